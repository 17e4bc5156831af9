use thiserror::Error;

/// Top-level error type for the whole crate. Each component gets its own
/// variant so callers can match on which subsystem failed without digging
/// through a generic string.
#[derive(Error, Debug)]
pub enum Error {
    #[error("resampler: {0}")]
    Resample(#[from] ResampleError),

    #[error("wav codec: {0}")]
    Wav(#[from] WavError),

    #[error("ogg codec: {0}")]
    Ogg(#[from] OggError),

    #[error("mfsk modem: {0}")]
    Modem(#[from] ModemError),

    #[error("sync engine: {0}")]
    Sync(#[from] SyncError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleError {
    #[error("sample rate must be > 0 (from={from}, to={to})")]
    InvalidSampleRate { from: i64, to: i64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WavError {
    #[error("not a RIFF/WAVE file")]
    InvalidMagic,
    #[error("unsupported wav format (audio format or bit depth)")]
    UnsupportedFormat,
    #[error("wav data truncated before a required chunk or sample")]
    Truncated,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OggError {
    #[error("invalid Ogg page magic")]
    InvalidMagic,
    #[error("Ogg page header or segment table truncated")]
    TruncatedPage,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModemError {
    #[error("string or binary field exceeds 255 bytes")]
    FieldTooLong,
    #[error("payload too long for a single RS block (max 127 bytes pre-RS)")]
    PayloadTooLong,
    #[error("payload is neither the compact onboarding shape nor valid JSON/UTF-8")]
    Deserialisation,
    #[error("sync pattern 0xA 0x5 0xA 0x5 not found in symbol stream")]
    SyncNotFound,
    #[error("symbol stream ended before the frame was fully read")]
    FrameTruncated,
    #[error("Reed-Solomon decode could not correct the block")]
    TooManyErrors,
    #[error("input audio buffer is empty")]
    EmptySignal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("user id must be set before start()")]
    NotLoggedIn,
    #[error("room {0} has no prev_batch token to backfill from")]
    NoPrevBatch(String),
    #[error("homeserver request failed: {0}")]
    Request(String),
    #[error("access token was rejected by the homeserver")]
    AuthorizationLost,
}
