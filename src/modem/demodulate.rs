//! MFSK demodulation pipeline: signal-boundary detection, sync acquisition,
//! symbol slicing, frame parsing, RS decode, and deserialization.

use crate::error::ModemError;

use super::config::{ModemConfig, NUM_TONES};
use super::frame;
use super::goertzel;
use super::rs;
use super::serialize::{self, DecodedPayload};

const WINDOW_MS: u32 = 50;
const WINDOW_OVERLAP: f32 = 0.5;
const THRESHOLD_FACTOR: f32 = 0.3;

fn percentile(sorted: &[f32], pct: f32) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f32 * pct).round() as usize;
    sorted[idx]
}

/// Sum of Goertzel power at all 16 tone frequencies over one window.
fn window_energy(samples: &[f32], start: usize, window_len: usize, config: &ModemConfig) -> f32 {
    (0..NUM_TONES as u8)
        .map(|sym| {
            goertzel::power(
                samples,
                start,
                window_len,
                config.tone_frequency(sym),
                config.sample_rate,
            )
        })
        .sum()
}

/// Find the `[start, end)` sample range containing signal, by sliding a
/// 50 ms / 50%-overlap window and thresholding total tone energy.
pub fn detect_active_region(samples: &[f32], config: &ModemConfig) -> Result<(usize, usize), ModemError> {
    if samples.is_empty() {
        return Err(ModemError::EmptySignal);
    }

    let window_len = (config.sample_rate as u64 * WINDOW_MS as u64 / 1000) as usize;
    let step = ((window_len as f32) * (1.0 - WINDOW_OVERLAP)).round().max(1.0) as usize;
    if window_len == 0 || window_len > samples.len() {
        return Ok((0, samples.len()));
    }

    let mut starts = Vec::new();
    let mut energies = Vec::new();
    let mut pos = 0;
    while pos + window_len <= samples.len() {
        energies.push(window_energy(samples, pos, window_len, config));
        starts.push(pos);
        pos += step;
    }

    if energies.is_empty() {
        return Ok((0, samples.len()));
    }

    let mut sorted = energies.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let p10 = percentile(&sorted, 0.10);
    let p90 = percentile(&sorted, 0.90);
    let threshold = p10 + THRESHOLD_FACTOR * (p90 - p10);

    let active: Vec<usize> = energies
        .iter()
        .enumerate()
        .filter(|(_, &e)| e > threshold)
        .map(|(i, _)| i)
        .collect();

    if active.is_empty() {
        return Ok((0, samples.len()));
    }

    let first = *active.first().unwrap();
    let last = *active.last().unwrap();

    let region_start_idx = first.saturating_sub(1);
    let region_end_idx = (last + 2).min(starts.len() - 1);

    let start = starts[region_start_idx];
    let end = (starts[region_end_idx] + window_len).min(samples.len());

    Ok((start, end))
}

/// Search for the preamble within the first
/// `symbol_duration * (preamble_len + 10)` samples of the active region and
/// return the absolute sample offset where it scores highest.
pub fn acquire_sync_offset(samples: &[f32], region: (usize, usize), config: &ModemConfig) -> usize {
    let (region_start, region_end) = region;
    let samples_per_symbol = config.samples_per_symbol();
    let samples_per_tone = config.samples_per_tone();
    let search_span = samples_per_symbol * (frame::PREAMBLE.len() + 10);
    let search_end = (region_start + search_span).min(region_end);
    let step = (samples_per_symbol / 4).max(1);

    let mut best_offset = region_start;
    let mut best_score = f32::MIN;

    let mut offset = region_start;
    while offset < search_end && offset + frame::PREAMBLE.len() * samples_per_symbol <= samples.len() {
        let mut score = 0.0;
        for (i, &sym) in frame::PREAMBLE.iter().enumerate() {
            let slot_start = offset + i * samples_per_symbol;
            score += goertzel::power(
                samples,
                slot_start,
                samples_per_tone,
                config.tone_frequency(sym),
                config.sample_rate,
            );
        }
        if score > best_score {
            best_score = score;
            best_offset = offset;
        }
        offset += step;
    }

    best_offset
}

/// Slice symbols from `start` to the end of the buffer, one per
/// `samples_per_symbol`-sized slot, taking the tone with maximum Goertzel
/// magnitude in each slot.
pub fn slice_symbols(samples: &[f32], start: usize, config: &ModemConfig) -> Vec<u8> {
    let samples_per_symbol = config.samples_per_symbol();
    let samples_per_tone = config.samples_per_tone();
    let mut symbols = Vec::new();

    let mut offset = start;
    while offset + samples_per_tone <= samples.len() {
        let mut best_symbol = 0u8;
        let mut best_power = f32::MIN;
        for sym in 0..NUM_TONES as u8 {
            let power = goertzel::power(
                samples,
                offset,
                samples_per_tone,
                config.tone_frequency(sym),
                config.sample_rate,
            );
            if power > best_power {
                best_power = power;
                best_symbol = sym;
            }
        }
        symbols.push(best_symbol);
        offset += samples_per_symbol;
    }

    symbols
}

/// Run the full demodulation pipeline on a PCM buffer at `config.sample_rate`,
/// returning the decoded payload.
pub fn decode(samples: &[f32], config: &ModemConfig) -> Result<DecodedPayload, ModemError> {
    let region = detect_active_region(samples, config)?;
    let sync_search_offset = acquire_sync_offset(samples, region, config);
    let symbols = slice_symbols(samples, sync_search_offset, config);
    let (pre_rs_len, rs_encoded) = frame::parse(&symbols)?;
    let decoded_bytes = rs::decode(&rs_encoded, pre_rs_len as usize)?;
    serialize::deserialize(&decoded_bytes)
}
