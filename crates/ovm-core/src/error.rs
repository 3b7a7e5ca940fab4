//! Error types for the core layer.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid configuration or command-line input.
    #[error("config error: {0}")]
    Config(String),

    /// Event delivery failure.
    #[error("notify error: {0}")]
    Notify(String),

    /// The bound host process exited.
    #[error("bind pid {0} exited")]
    BindPidExited(u32),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Win32 error.
    #[error(transparent)]
    Win32(#[from] ovm_win32::Win32Error),
}

impl CoreError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new notify error.
    #[must_use]
    pub fn notify(msg: impl Into<String>) -> Self {
        Self::Notify(msg.into())
    }
}
