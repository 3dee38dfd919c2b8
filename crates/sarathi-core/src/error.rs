use thiserror::Error;

/// Top-level error type for the Sarathi client.
///
/// Storage and transport crates map their library errors into the string
/// variants here so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SarathiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Question cannot be empty")]
    EmptyQuestion,

    #[error("Voice input is busy")]
    VoiceBusy,

    #[error("Microphone permission denied")]
    MicrophonePermissionDenied,

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("No speech detected")]
    NoSpeechDetected,

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for SarathiError {
    fn from(err: toml::de::Error) -> Self {
        SarathiError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SarathiError {
    fn from(err: toml::ser::Error) -> Self {
        SarathiError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SarathiError {
    fn from(err: serde_json::Error) -> Self {
        SarathiError::Serialization(err.to_string())
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SarathiError>;
