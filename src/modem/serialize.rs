//! Onboarding payload serialization: a compact binary form for the
//! homeserver/username/password/room shape, with a JSON fallback for
//! anything else.

use serde::{Deserialize, Serialize};

use crate::error::ModemError;

pub const BINARY_MAGIC: u8 = 0xB1;

/// Matrix onboarding credentials handed to the modem for acoustic transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingPayload {
    pub homeserver: String,
    pub username: String,
    pub password: String,
    pub room: String,
}

fn write_field(out: &mut Vec<u8>, field: &str) -> Result<(), ModemError> {
    let bytes = field.as_bytes();
    if bytes.len() > 255 {
        return Err(ModemError::FieldTooLong);
    }
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_field<'a>(data: &'a [u8], offset: &mut usize) -> Result<&'a str, ModemError> {
    let len = *data.get(*offset).ok_or(ModemError::Deserialisation)? as usize;
    *offset += 1;
    let end = offset.checked_add(len).ok_or(ModemError::Deserialisation)?;
    let field_bytes = data.get(*offset..end).ok_or(ModemError::Deserialisation)?;
    let field = std::str::from_utf8(field_bytes).map_err(|_| ModemError::Deserialisation)?;
    *offset = end;
    Ok(field)
}

/// Serialize a payload: compact binary for `OnboardingPayload`, JSON UTF-8
/// for anything else.
pub fn serialize(payload: &OnboardingPayload) -> Result<Vec<u8>, ModemError> {
    let mut out = vec![BINARY_MAGIC];
    write_field(&mut out, &payload.homeserver)?;
    write_field(&mut out, &payload.username)?;
    write_field(&mut out, &payload.password)?;
    write_field(&mut out, &payload.room)?;
    Ok(out)
}

/// Serialize an arbitrary JSON-serializable payload as UTF-8 JSON.
pub fn serialize_json<T: Serialize>(payload: &T) -> Result<Vec<u8>, ModemError> {
    serde_json::to_vec(payload).map_err(|_| ModemError::Deserialisation)
}

/// What a decoded payload turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    Onboarding(OnboardingPayload),
    Json(serde_json::Value),
}

/// Deserialize a payload, discriminating on the leading magic byte.
pub fn deserialize(data: &[u8]) -> Result<DecodedPayload, ModemError> {
    if data.first() == Some(&BINARY_MAGIC) {
        let mut offset = 1;
        let homeserver = read_field(data, &mut offset)?.to_string();
        let username = read_field(data, &mut offset)?.to_string();
        let password = read_field(data, &mut offset)?.to_string();
        let room = read_field(data, &mut offset)?.to_string();
        return Ok(DecodedPayload::Onboarding(OnboardingPayload {
            homeserver,
            username,
            password,
            room,
        }));
    }

    let text = std::str::from_utf8(data).map_err(|_| ModemError::Deserialisation)?;
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| ModemError::Deserialisation)?;
    Ok(DecodedPayload::Json(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OnboardingPayload {
        OnboardingPayload {
            homeserver: "https://matrix.org".to_string(),
            username: "alice".to_string(),
            password: "walkietalkie123".to_string(),
            room: "!family:matrix.org".to_string(),
        }
    }

    #[test]
    fn binary_round_trip() {
        let payload = sample();
        let bytes = serialize(&payload).unwrap();
        assert_eq!(bytes[0], BINARY_MAGIC);
        match deserialize(&bytes).unwrap() {
            DecodedPayload::Onboarding(decoded) => assert_eq!(decoded, payload),
            DecodedPayload::Json(_) => panic!("expected binary decode"),
        }
    }

    #[test]
    fn field_too_long_fails_fast() {
        let mut payload = sample();
        payload.username = "a".repeat(256);
        assert_eq!(serialize(&payload), Err(ModemError::FieldTooLong));
    }

    #[test]
    fn non_magic_bytes_fall_back_to_json() {
        let bytes = serialize_json(&serde_json::json!({"kind": "other"})).unwrap();
        match deserialize(&bytes).unwrap() {
            DecodedPayload::Json(value) => assert_eq!(value["kind"], "other"),
            DecodedPayload::Onboarding(_) => panic!("expected json decode"),
        }
    }

    #[test]
    fn malformed_utf8_fails() {
        assert_eq!(deserialize(&[0xFF, 0xFE, 0xFD]), Err(ModemError::Deserialisation));
    }
}
