//! Reed-Solomon over GF(256) at a fixed 50% redundancy ratio, wrapping the
//! `reed-solomon` crate's systematic encoder/decoder.
//!
//! The source's `encoded_length(L) = L + floor(L * 0.5 * 2) = 2L` formula
//! only holds for a single RS block. The underlying crate caps a block at
//! 255 total symbols (data + parity), so with parity == data length that
//! caps `L` at 127. We enforce that explicitly rather than silently
//! chunking into multiple blocks the frame format has no room to describe
//! (the frame's length field is one byte).
use reed_solomon::{Decoder, Encoder};

use crate::error::ModemError;

pub const MAX_PRE_RS_LEN: usize = 127;

/// `L' = L + floor(L * 0.5 * 2) = 2L`, the deterministic encoded-length
/// formula from §4.4.
pub fn encoded_length(pre_rs_len: usize) -> usize {
    pre_rs_len + (pre_rs_len as f64 * 0.5 * 2.0).floor() as usize
}

/// RS-encode `data` (length `L`) to length `2L`.
pub fn encode(data: &[u8]) -> Result<Vec<u8>, ModemError> {
    if data.len() > MAX_PRE_RS_LEN {
        return Err(ModemError::PayloadTooLong);
    }
    let ecc_len = data.len();
    let encoder = Encoder::new(ecc_len);
    let buffer = encoder.encode(data);
    Ok(buffer.to_vec())
}

/// RS-decode an encoded block of length `2L`, returning the corrected
/// leading `L` bytes. Fails with `TooManyErrors` if the block cannot be
/// corrected.
pub fn decode(encoded: &[u8], pre_rs_len: usize) -> Result<Vec<u8>, ModemError> {
    if pre_rs_len > MAX_PRE_RS_LEN || encoded.len() != encoded_length(pre_rs_len) {
        return Err(ModemError::FrameTruncated);
    }
    let ecc_len = pre_rs_len;
    let decoder = Decoder::new(ecc_len);
    let corrected = decoder
        .correct(encoded, None)
        .map_err(|_| ModemError::TooManyErrors)?;
    Ok(corrected.data().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_length_doubles_input() {
        for l in [0usize, 1, 10, 50, 127] {
            assert_eq!(encoded_length(l), 2 * l);
        }
    }

    #[test]
    fn round_trips_clean_channel() {
        let data = b"hello reed solomon";
        let encoded = encode(data).unwrap();
        assert_eq!(encoded.len(), 2 * data.len());
        let decoded = decode(&encoded, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn corrects_errors_within_capability() {
        let data = b"a reasonably long test payload for rs";
        let mut encoded = encode(data).unwrap();
        // 50% redundancy corrects up to ecc_len/2 byte errors.
        encoded[0] ^= 0xFF;
        encoded[3] ^= 0xFF;
        let decoded = decode(&encoded, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn rejects_payload_over_block_limit() {
        let data = vec![0u8; MAX_PRE_RS_LEN + 1];
        assert_eq!(encode(&data), Err(ModemError::PayloadTooLong));
    }

    #[test]
    fn too_many_errors_fails() {
        let data = b"short";
        let mut encoded = encode(data).unwrap();
        for byte in encoded.iter_mut() {
            *byte ^= 0xFF;
        }
        assert_eq!(decode(&encoded, data.len()), Err(ModemError::TooManyErrors));
    }
}
