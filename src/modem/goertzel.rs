//! Goertzel single-bin squared-magnitude power, used for both tone
//! detection and signal-boundary energy estimation.

/// Squared magnitude of the DFT bin nearest `frequency_hz` over
/// `samples[start..start+window_len]`. No square root needed since callers
/// only compare magnitudes relatively.
pub fn power(samples: &[f32], start: usize, window_len: usize, frequency_hz: f32, sample_rate: u32) -> f32 {
    let window = match samples.get(start..start + window_len) {
        Some(w) => w,
        None => return 0.0,
    };
    let n = window_len as f32;
    let k = (n * frequency_hz / sample_rate as f32).round();
    let omega = 2.0 * std::f32::consts::PI * k / n;
    let coeff = 2.0 * omega.cos();

    let mut s1 = 0.0f32;
    let mut s2 = 0.0f32;
    for &x in window {
        let s0 = x + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }

    s1 * s1 + s2 * s2 - coeff * s1 * s2
}
