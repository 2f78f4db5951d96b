//! Error types for the wake detector.

use thiserror::Error;

/// Result type alias for detector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the detection loop
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// A single frame read failed (overflow, pipe hiccup, stalled stream)
    #[error("audio error: {0}")]
    Audio(String),

    /// An audio device could not be resolved or opened
    #[error("device error: {0}")]
    Device(String),

    /// Wake-word model or backend failure
    #[error("engine error: {0}")]
    Engine(String),

    /// Host notification could not be delivered
    #[error("notify error: {0}")]
    Notify(String),

    /// Debug recording could not be written
    #[error("recording error: {0}")]
    Recording(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the loop must stop when this error reaches it.
    ///
    /// Read hiccups, notification failures and recording failures are
    /// survivable; everything else means the loop cannot make progress.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Audio(_) | Self::Notify(_) | Self::Recording(_))
    }
}
