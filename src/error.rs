//! Error types for the tutor voice pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access denied or unavailable
    #[error("microphone permission error: {0}")]
    Permission(String),

    /// Live session could not be established
    #[error("connect error: {0}")]
    Connect(String),

    /// Live connection dropped or reported an error
    #[error("transport error: {0}")]
    Transport(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Reasons an inbound audio blob cannot be decoded
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Blob carried no audio bytes
    #[error("empty audio payload")]
    Empty,

    /// Byte length is not a whole number of 16-bit sample frames
    #[error("incomplete sample: {0} bytes is not a whole number of frames")]
    IncompleteSample(usize),

    /// Payload is not valid base64
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Mime type is not raw PCM
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Resampling to the playback rate failed
    #[error("resample failed: {0}")]
    Resample(String),
}
