//! MFSK modulation: one raised-cosine-windowed tone per symbol, followed by
//! a silence guard, with phase carried continuously across symbols so
//! adjacent tones don't click.

use super::config::ModemConfig;

const ROLLOFF: f32 = 0.1;
const AMPLITUDE: f32 = 0.8;

fn raised_cosine_envelope(i: usize, n: usize) -> f32 {
    if n == 0 {
        return 1.0;
    }
    let ramp_len = ((n as f32) * ROLLOFF).round() as usize;
    if ramp_len == 0 {
        return 1.0;
    }
    if i < ramp_len {
        0.5 * (1.0 - (std::f32::consts::PI * i as f32 / ramp_len as f32).cos())
    } else if i >= n - ramp_len {
        let j = n - 1 - i;
        0.5 * (1.0 - (std::f32::consts::PI * j as f32 / ramp_len as f32).cos())
    } else {
        1.0
    }
}

/// Modulate a symbol stream (each value in `[0, 15]`) into a PCM buffer at
/// `config.sample_rate`.
pub fn modulate(symbols: &[u8], config: &ModemConfig) -> Vec<f32> {
    let samples_per_tone = config.samples_per_tone();
    let guard_samples = config.guard_samples();
    let mut out = Vec::with_capacity(symbols.len() * (samples_per_tone + guard_samples));

    let mut phase = 0.0f32;
    for &symbol in symbols {
        let freq = config.tone_frequency(symbol);
        let phase_step = 2.0 * std::f32::consts::PI * freq / config.sample_rate as f32;

        for i in 0..samples_per_tone {
            let envelope = raised_cosine_envelope(i, samples_per_tone);
            out.push(AMPLITUDE * envelope * phase.sin());
            phase += phase_step;
            if phase > 2.0 * std::f32::consts::PI {
                phase -= 2.0 * std::f32::consts::PI;
            }
        }

        out.extend(std::iter::repeat(0.0).take(guard_samples));
    }

    out
}
