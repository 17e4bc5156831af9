//! Linear-interpolation sample-rate conversion.
//!
//! Sufficient for speech and has no internal state, at the cost of aliasing
//! above Nyquist/2 on upsampling. The MFSK tones this crate cares about sit
//! well below Nyquist at every supported rate, so that trade-off is fine.

use crate::error::ResampleError;

/// Resample `input` from `from_hz` to `to_hz` by linear interpolation.
///
/// Returns a fresh `Vec` even when `from_hz == to_hz` (a byte-wise copy, not
/// an alias of the input).
pub fn resample(input: &[f32], from_hz: u32, to_hz: u32) -> Result<Vec<f32>, ResampleError> {
    if from_hz == 0 || to_hz == 0 {
        return Err(ResampleError::InvalidSampleRate {
            from: from_hz as i64,
            to: to_hz as i64,
        });
    }

    if input.is_empty() {
        return Ok(Vec::new());
    }

    if from_hz == to_hz {
        return Ok(input.to_vec());
    }

    let out_len = ((input.len() as u64 * to_hz as u64 + from_hz as u64 - 1) / from_hz as u64)
        as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let p = (i as u64 * from_hz as u64) as f64 / to_hz as f64;
        let k = p.floor() as usize;
        let f = (p - k as f64) as f32;
        let k_prime = (k + 1).min(input.len() - 1);
        let k = k.min(input.len() - 1);
        output.push(input[k] * (1.0 - f) + input[k_prime] * f);
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_empty_output() {
        assert_eq!(resample(&[], 16_000, 48_000).unwrap(), Vec::<f32>::new());
    }

    #[test]
    fn same_rate_is_a_copy_not_an_alias() {
        let input = vec![0.1, -0.2, 0.3];
        let output = resample(&input, 16_000, 16_000).unwrap();
        assert_eq!(output, input);
        assert_ne!(output.as_ptr(), input.as_ptr());
    }

    #[test]
    fn rejects_non_positive_rates() {
        assert!(matches!(
            resample(&[0.0], 0, 16_000),
            Err(ResampleError::InvalidSampleRate { .. })
        ));
        assert!(matches!(
            resample(&[0.0], 16_000, 0),
            Err(ResampleError::InvalidSampleRate { .. })
        ));
    }

    #[test]
    fn output_length_matches_ceiling_formula() {
        let input = vec![0.0f32; 100];
        let output = resample(&input, 44_100, 16_000).unwrap();
        let expected = ((100u64 * 16_000 + 44_100 - 1) / 44_100) as usize;
        assert_eq!(output.len(), expected);
    }

    #[test]
    fn first_sample_is_exact() {
        let input = vec![0.42, 0.1, -0.3, 0.9];
        let output = resample(&input, 8_000, 44_100).unwrap();
        assert_eq!(output[0], input[0]);
    }

    #[test]
    fn stays_within_input_range() {
        let input: Vec<f32> = (0..441).map(|i| (2.0 * std::f32::consts::PI * i as f32 / 441.0).sin()).collect();
        let output = resample(&input, 44_100, 16_000).unwrap();
        let min = input.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = input.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        for &s in &output {
            assert!(s >= min - 1e-4 && s <= max + 1e-4);
        }
    }

    #[test]
    fn sine_resample_stays_smooth() {
        let input: Vec<f32> = (0..4410)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / 441.0).sin())
            .collect();
        let output = resample(&input, 44_100, 16_000).unwrap();
        for pair in output.windows(2) {
            assert!((pair[1] - pair[0]).abs() < 0.5);
        }
    }
}
