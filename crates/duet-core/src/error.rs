//! Unified error types for duet

use thiserror::Error;

/// Unified error type for all duet operations
#[derive(Error, Debug)]
pub enum DuetError {
    // Model errors
    #[error("Model invocation failed: {0}")]
    ModelInvocationFailed(String),

    // Sandbox errors
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    // Event stream errors
    #[error("Observer disconnected")]
    ObserverGone,

    #[error("Run already finished; no events may follow the terminal event")]
    RunFinished,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using DuetError
pub type Result<T> = std::result::Result<T, DuetError>;
