//! `wsl.exe` discovery.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static WSL_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved `wsl.exe` path, probing once per process.
///
/// Probe order: the MSI/Store install under Program Files, the
/// per-user Store app alias, then System32; bare `wsl` as last resort.
pub fn find_wsl() -> &'static Path {
    WSL_PATH.get_or_init(|| {
        let candidates = [
            ovm_core::path::program_files().join("WSL").join("wsl.exe"),
            ovm_core::path::local_app_data()
                .map(|p| p.join("Microsoft").join("WindowsApps").join("wsl.exe"))
                .unwrap_or_default(),
            ovm_core::path::system32().join("wsl.exe"),
        ];

        for candidate in candidates {
            if candidate.as_os_str().is_empty() {
                continue;
            }
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "Found wsl.exe");
                return candidate;
            }
        }

        PathBuf::from("wsl")
    })
}
