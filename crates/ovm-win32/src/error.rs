//! Error types for Win32 operations.

use thiserror::Error;

/// Result type alias for Win32 operations.
pub type Result<T> = std::result::Result<T, Win32Error>;

/// Errors returned by the Win32 wrappers.
#[derive(Debug, Error)]
pub enum Win32Error {
    /// A Win32 API call failed; `op` names the call site.
    #[error("{op} failed: {source}")]
    Api {
        /// The API that failed.
        op: &'static str,
        /// The OS error captured at the call site.
        #[source]
        source: std::io::Error,
    },

    /// The elevated child process exited with a nonzero code.
    #[error("elevated process exited with code {0}")]
    ChildExit(u32),

    /// ShellExecuteEx rejected the launch (SE_ERR_* family).
    #[error("failed to run as admin: {0}")]
    ShellExecute(&'static str),

    /// The operation only exists on Windows.
    #[error("{op} is not supported on this platform")]
    Unsupported {
        /// The operation that was requested.
        op: &'static str,
    },

    /// Plain I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Win32Error {
    /// Captures `GetLastError` for a failed API call.
    #[must_use]
    pub fn last_error(op: &'static str) -> Self {
        Self::Api {
            op,
            source: std::io::Error::last_os_error(),
        }
    }

    /// Marks an operation as Windows-only.
    #[must_use]
    pub const fn unsupported(op: &'static str) -> Self {
        Self::Unsupported { op }
    }
}
