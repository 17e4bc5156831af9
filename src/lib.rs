//! Acoustic credential transfer and room-sync state engine for the wata
//! walkie-talkie app.
//!
//! Five components, each usable independently:
//!
//! - [`resample`]: linear-interpolation sample-rate conversion.
//! - [`wav`]: 16-bit PCM WAV encode/decode for local recording.
//! - [`ogg`]: bit-exact Ogg container muxing/demuxing for Opus streams.
//! - [`modem`]: 16-tone MFSK acoustic modem for device-to-device onboarding.
//! - [`sync`]: a Matrix-style long-poll sync engine and room state machine.

pub mod error;
pub mod modem;
pub mod ogg;
pub mod resample;
pub mod sync;
pub mod wav;

pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;
