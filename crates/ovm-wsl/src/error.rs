//! Error types for the WSL adapter.

use crate::classify::{WslFailure, classify};
use thiserror::Error;

/// Result type alias for WSL operations.
pub type Result<T> = std::result::Result<T, WslError>;

/// Errors returned by WSL operations.
///
/// The first three are expected outcomes, not failures: call sites
/// pattern-match them to drive control flow.
#[derive(Debug, Error)]
pub enum WslError {
    /// The distro is not registered.
    #[error("distro does not exist")]
    DistroNotExist,

    /// The distro is registered but not running.
    #[error("distro is not running")]
    DistroNotRunning,

    /// The distro's files are held open (move/manage conflicts).
    #[error("sharing violation")]
    SharingViolation,

    /// A `wsl.exe` invocation failed; `detail` carries the synthetic
    /// stderr+stdout+status text used for classification.
    #[error("failed to run command `{command}`: {detail}")]
    Command {
        /// The verbatim command line.
        command: String,
        /// Concatenated stderr, stdout and exit reason.
        detail: String,
    },

    /// Environment setup or probing failed.
    #[error("{0}")]
    Setup(String),

    /// HTTP failure (manifest fetch, download, readiness probe).
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Win32 error.
    #[error(transparent)]
    Win32(#[from] ovm_win32::Win32Error),

    /// Core-layer error.
    #[error(transparent)]
    Core(#[from] ovm_core::CoreError),
}

impl WslError {
    /// Creates a setup error.
    #[must_use]
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    /// Classifies a command failure by its captured output.
    #[must_use]
    pub fn failure(&self) -> WslFailure {
        match self {
            Self::Command { detail, .. } => classify(detail),
            Self::SharingViolation => WslFailure::SharingViolation,
            _ => WslFailure::Unknown,
        }
    }
}
