//! Canonical PCM/WAV encode and decode.
//!
//! Encode always emits 16-bit signed PCM in a minimal 44-byte header. Decode
//! tolerates 8/16/24/32-bit PCM and walks chunks rather than assuming `fmt `
//! immediately precedes `data`.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::WavError;

/// Format metadata recovered from a decoded WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

const RIFF_HEADER_LEN: usize = 44;

/// Encode interleaved float samples in `[-1.0, 1.0]` as 16-bit PCM WAV bytes.
pub fn encode(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_len = samples.len() * 2;
    let mut out = Vec::with_capacity(RIFF_HEADER_LEN + data_len);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    let block_align = channels as u32 * 2;
    let byte_rate = sample_rate * block_align;
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&(block_align as u16).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());

    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let scaled = (clamped * 32767.0).round() as i32;
        let clamped_i16 = scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        out.extend_from_slice(&clamped_i16.to_le_bytes());
    }

    out
}

/// Decode a WAV file into interleaved float samples in `[-1.0, 1.0]`.
pub fn decode(bytes: &[u8]) -> Result<(Vec<f32>, WavFormat), WavError> {
    if bytes.len() < 12 {
        return Err(WavError::Truncated);
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(WavError::InvalidMagic);
    }

    let mut offset = 12;
    let mut fmt: Option<(u16, u16, u32, u16)> = None; // (audio_format, channels, sample_rate, bits)
    let mut data: Option<&[u8]> = None;

    while offset + 8 <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_len = LittleEndian::read_u32(&bytes[offset + 4..offset + 8]) as usize;
        let body_start = offset + 8;
        let body_end = body_start.checked_add(chunk_len).ok_or(WavError::Truncated)?;
        if body_end > bytes.len() {
            return Err(WavError::Truncated);
        }
        let body = &bytes[body_start..body_end];

        match chunk_id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(WavError::Truncated);
                }
                let audio_format = LittleEndian::read_u16(&body[0..2]);
                let channels = LittleEndian::read_u16(&body[2..4]);
                let sample_rate = LittleEndian::read_u32(&body[4..8]);
                let bits_per_sample = LittleEndian::read_u16(&body[14..16]);
                fmt = Some((audio_format, channels, sample_rate, bits_per_sample));
            }
            b"data" => {
                data = Some(body);
            }
            _ => {}
        }

        // Chunks are word-aligned; an odd-length chunk has a pad byte.
        offset = body_end + (chunk_len & 1);
    }

    let (audio_format, channels, sample_rate, bits_per_sample) =
        fmt.ok_or(WavError::Truncated)?;
    let data = data.ok_or(WavError::Truncated)?;

    if audio_format != 1 {
        return Err(WavError::UnsupportedFormat);
    }

    let samples = match bits_per_sample {
        8 => data.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        16 => data
            .chunks_exact(2)
            .map(|c| LittleEndian::read_i16(c) as f32 / 32768.0)
            .collect(),
        24 => data
            .chunks_exact(3)
            .map(|c| {
                let raw = (c[0] as i32) | ((c[1] as i32) << 8) | ((c[2] as i32) << 16);
                let signed = if raw & 0x0080_0000 != 0 {
                    raw - 0x0100_0000
                } else {
                    raw
                };
                signed as f32 / 8_388_608.0
            })
            .collect(),
        32 => data
            .chunks_exact(4)
            .map(|c| LittleEndian::read_i32(c) as f32 / 2_147_483_648.0)
            .collect(),
        _ => return Err(WavError::UnsupportedFormat),
    };

    Ok((
        samples,
        WavFormat {
            sample_rate,
            channels,
            bits_per_sample,
        },
    ))
}
