//! Error types shared across the crate.
//!
//! Expected capture failures (tool absent, transient capture errors) are
//! modeled as values on [`crate::capture::CaptureResult`]; this enum carries
//! everything else: configuration rejections, fatal chain-build failures,
//! and faults that should abort a session.

use thiserror::Error;

/// Top-level error type for screen-sentinel operations.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("No capture backend could be constructed on this platform")]
    NoBackendAvailable,

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Detection error: {message}")]
    Detection { message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SentinelError.
pub type SentinelResult<T> = Result<T, SentinelError>;

impl SentinelError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn detection(msg: impl Into<String>) -> Self {
        Self::Detection {
            message: msg.into(),
        }
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session {
            message: msg.into(),
        }
    }
}
