//! The MFSK modem: serialize -> RS-encode -> nibble-split -> frame-assemble
//! -> modulate on send; the full inverse on receive.

pub mod config;
pub mod demodulate;
pub mod frame;
pub mod goertzel;
pub mod modulate;
pub mod rs;
pub mod serialize;

pub use config::ModemConfig;
pub use demodulate::decode;
pub use serialize::{DecodedPayload, OnboardingPayload};

use crate::error::ModemError;

/// Encode an onboarding credential record to a PCM audio buffer.
pub fn encode_onboarding(payload: &OnboardingPayload, config: &ModemConfig) -> Result<Vec<f32>, ModemError> {
    let bytes = serialize::serialize(payload)?;
    encode_bytes(&bytes, config)
}

/// Encode an arbitrary JSON-serializable payload to a PCM audio buffer.
pub fn encode_json<T: serde::Serialize>(payload: &T, config: &ModemConfig) -> Result<Vec<f32>, ModemError> {
    let bytes = serialize::serialize_json(payload)?;
    encode_bytes(&bytes, config)
}

fn encode_bytes(bytes: &[u8], config: &ModemConfig) -> Result<Vec<f32>, ModemError> {
    if bytes.len() > rs::MAX_PRE_RS_LEN {
        return Err(ModemError::PayloadTooLong);
    }
    let rs_encoded = rs::encode(bytes)?;
    let symbols = frame::assemble(&rs_encoded, bytes.len() as u8);
    Ok(modulate::modulate(&symbols, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onboarding_payload_round_trips_clean_channel() {
        let config = ModemConfig::default();
        let payload = OnboardingPayload {
            homeserver: "https://matrix.org".to_string(),
            username: "alice".to_string(),
            password: "walkietalkie123".to_string(),
            room: "!family:matrix.org".to_string(),
        };
        let pcm = encode_onboarding(&payload, &config).unwrap();
        let decoded = decode(&pcm, &config).unwrap();
        match decoded {
            DecodedPayload::Onboarding(decoded) => assert_eq!(decoded, payload),
            DecodedPayload::Json(_) => panic!("expected onboarding decode"),
        }
    }

    #[test]
    fn json_fallback_round_trips() {
        let config = ModemConfig::default();
        let value = serde_json::json!({"note": "not an onboarding payload"});
        let pcm = encode_json(&value, &config).unwrap();
        let decoded = decode(&pcm, &config).unwrap();
        match decoded {
            DecodedPayload::Json(decoded) => assert_eq!(decoded, value),
            DecodedPayload::Onboarding(_) => panic!("expected json decode"),
        }
    }

    #[test]
    fn oversized_payload_is_rejected_before_rs() {
        let config = ModemConfig::default();
        let huge = OnboardingPayload {
            homeserver: "a".repeat(250),
            username: "b".repeat(250),
            password: "c".repeat(250),
            room: "d".repeat(250),
        };
        assert_eq!(
            encode_onboarding(&huge, &config),
            Err(ModemError::PayloadTooLong)
        );
    }
}
