//! Error types for the streaming core

use thiserror::Error;

/// Result type for streaming operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid option value, missing voice or unsupported format. Raised before a session starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A synthesizer failed on one utterance
    #[error("Synthesis failed on engine '{engine}': {reason}")]
    Synthesis { engine: String, reason: String },

    /// The sink device failed to open or write
    #[error("Audio device error: {0}")]
    Device(String),

    /// A lazy text source failed while being drained
    #[error("Text source error: {0}")]
    TextSource(String),

    #[error("A play session is already running; call stop() before starting another")]
    AlreadyPlaying,

    #[error("No synthesizer loaded; pass at least one engine to the stream")]
    NoEngine,

    /// The operation was interrupted by stop()
    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn synthesis(engine: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Synthesis {
            engine: engine.into(),
            reason: reason.into(),
        }
    }

    /// Engine failures the dispatcher recovers from by retrying the utterance
    /// on the next engine. Cancellation, device and programmer errors are not
    /// retried.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Error::Cancelled | Error::Device(_) | Error::AlreadyPlaying | Error::NoEngine
        )
    }
}
