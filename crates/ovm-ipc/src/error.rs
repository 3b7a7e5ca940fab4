//! Error types for the IPC plane.

use thiserror::Error;

/// Result type alias for IPC operations.
pub type Result<T> = std::result::Result<T, IpcError>;

/// Errors that can occur serving or dialing the control pipes.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Server setup or accept failure.
    #[error("server error: {0}")]
    Server(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Win32 error (pipe creation, SDDL).
    #[error(transparent)]
    Win32(#[from] ovm_win32::Win32Error),
}

impl IpcError {
    /// Creates a server error.
    #[must_use]
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }
}
