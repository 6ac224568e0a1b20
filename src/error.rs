use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Negotiation failed at {step}: {reason}")]
    Negotiation { step: &'static str, reason: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Stats error: {0}")]
    Stats(String),

    #[error("Pose producer error: {0}")]
    Producer(String),
}

impl AppError {
    /// Build a negotiation error for the given step
    pub fn negotiation(step: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Negotiation {
            step,
            reason: reason.to_string(),
        }
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
