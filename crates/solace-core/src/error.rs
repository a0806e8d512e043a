use thiserror::Error;

/// Top-level error type for the Solace engine.
///
/// Each variant wraps a subsystem-specific failure. Subsystem crates define
/// their own error types where they need richer structure and implement
/// `From<SubsystemError> for SolaceError` so that the `?` operator works
/// across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SolaceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Voice session error: {0}")]
    Voice(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for SolaceError {
    fn from(err: toml::de::Error) -> Self {
        SolaceError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SolaceError {
    fn from(err: toml::ser::Error) -> Self {
        SolaceError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SolaceError {
    fn from(err: serde_json::Error) -> Self {
        SolaceError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Solace operations.
pub type Result<T> = std::result::Result<T, SolaceError>;
