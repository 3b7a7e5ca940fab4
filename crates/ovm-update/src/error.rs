//! Error types for the artifact updater.

use thiserror::Error;

/// Result type alias for updater operations.
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Errors that can occur while replacing disk layers.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Data-disk replacement failed.
    #[error("data update failed: {0}")]
    Data(String),

    /// Rootfs replacement failed.
    #[error("rootfs update failed: {0}")]
    Rootfs(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Core-layer error (manifest persistence).
    #[error(transparent)]
    Core(#[from] ovm_core::CoreError),
}

impl UpdateError {
    /// Creates a data-layer error.
    #[must_use]
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Creates a rootfs-layer error.
    #[must_use]
    pub fn rootfs(msg: impl Into<String>) -> Self {
        Self::Rootfs(msg.into())
    }
}
