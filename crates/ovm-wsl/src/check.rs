//! Environment gates probed by the `init` state machine.

use crate::error::{Result, WslError};
use crate::exec::Exec;
use crate::invoke::wsl_exec;
use std::fmt;
use std::str::FromStr;

/// Minimum Windows build hosting a working WSL2 (21H2).
///
/// Microsoft documents 19041, but the current WSL2 releases misbehave
/// below 19044 in practice.
pub const MIN_WINDOWS_BUILD: u32 = 19044;

/// Minimum supported WSL runtime version.
pub const MIN_WSL_VERSION: WslVersion = WslVersion::new(2, 3, 24);

/// `--status` output markers meaning the optional features are off.
const FEATURE_MISSING_MARKERS: &[&str] = &[
    "Windows Subsystem for Linux",
    "BIOS",
    "wsl.exe",
    "enablevirtualization",
    "WSL1",
];

/// Windows-10-era error suggesting a full install.
const INSTALL_HINT: &str = "--install --no-distribution";

/// Marker echoed through a distro to prove the VM can start.
const ECHO_PROBE: &str = "TEST_PASS";

/// Scratch distro name used by the import probe.
const SCRATCH_DISTRO: &str = "ovm-env-probe";

/// A parsed `wsl --version` runtime version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WslVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
}

impl WslVersion {
    /// Creates a version triple.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for WslVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for WslVersion {
    type Err = WslError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('.');
        let mut next = |label: &str| -> Result<u32> {
            parts
                .next()
                .unwrap_or("0")
                .parse()
                .map_err(|_| WslError::setup(format!("invalid {label} in WSL version `{s}`")))
        };

        Ok(Self {
            major: next("major")?,
            minor: next("minor")?,
            patch: next("patch")?,
        })
    }
}

/// Whether this Windows build can host WSL2 at all.
///
/// When the build number cannot be determined (non-Windows dev hosts)
/// the gate passes; the later probes will fail honestly.
#[must_use]
pub fn windows_build_supported() -> bool {
    match ovm_win32::version::windows_build_number() {
        Ok(build) => {
            tracing::info!(build, "Current system build number");
            build >= MIN_WINDOWS_BUILD
        }
        Err(e) => {
            tracing::debug!("Cannot read build number: {e}");
            true
        }
    }
}

/// Whether the installed `wsl.exe` advertises `--version`.
///
/// Pre-store releases do not; their presence alone means an update.
pub async fn supports_version_flag() -> bool {
    match Exec::new().run(&["--help"]).await {
        Ok(out) => out.all_out().contains("--version, -v"),
        Err(e) => {
            tracing::warn!("wsl --help probe failed: {e}");
            false
        }
    }
}

/// Parses the runtime version out of `wsl --version`.
///
/// The first line reads `WSL version: 2.3.24.0`; the token after the
/// last space is the version.
pub async fn wsl_version() -> Result<WslVersion> {
    let output = wsl_exec(&["--version"])
        .await
        .map_err(|e| WslError::setup(format!("failed to get WSL version: {e}")))?;

    parse_version_output(&output)
}

fn parse_version_output(output: &str) -> Result<WslVersion> {
    let first_line = output.lines().next().unwrap_or("").trim();
    let token = first_line
        .rsplit(' ')
        .next()
        .ok_or_else(|| WslError::setup(format!("failed to parse WSL version: {output}")))?;

    // Releases report four fields (2.3.24.0); the triple is enough.
    let mut fields = token.splitn(4, '.');
    let triple = [
        fields.next().unwrap_or_default(),
        fields.next().unwrap_or_default(),
        fields.next().unwrap_or_default(),
    ]
    .join(".");

    triple.parse()
}

/// Whether the WSL runtime is missing or below the floor.
pub async fn needs_wsl_update() -> bool {
    if !supports_version_flag().await {
        tracing::info!("wsl.exe does not advertise --version, update required");
        return true;
    }

    match wsl_version().await {
        Ok(version) => {
            tracing::info!(%version, "Current WSL version");
            version < MIN_WSL_VERSION
        }
        Err(e) => {
            tracing::warn!("Failed to determine WSL version: {e}");
            true
        }
    }
}

/// Whether the WSL optional features are enabled.
///
/// `--set-default-version 2` doubles as a cheap probe and as the
/// default-version configuration; the verdict comes from `--status`.
pub async fn features_enabled() -> bool {
    if let Err(e) = Exec::new().run(&["--set-default-version", "2"]).await {
        tracing::warn!("set-default-version probe failed: {e}");
    }

    let status = match Exec::new().run(&["--status"]).await {
        Ok(out) => out.all_out(),
        Err(e) => {
            tracing::warn!("wsl --status failed: {e}");
            return false;
        }
    };

    features_enabled_in_status(&status)
}

/// Applies the `--status` keyword heuristic.
///
/// A healthy status is header lines only. The first two `:`-carrying
/// lines (default distro / default version) are headers and skipped;
/// any known marker in what remains, or the Windows-10 install hint
/// anywhere, means the features are off.
fn features_enabled_in_status(status: &str) -> bool {
    if status.contains(INSTALL_HINT) {
        return false;
    }

    let mut skipped_headers = 0;
    let mut remainder = String::new();
    for line in status.lines() {
        if skipped_headers < 2 && line.contains(':') {
            skipped_headers += 1;
            continue;
        }
        remainder.push_str(line);
        remainder.push('\n');
    }

    let remainder = remainder.trim();
    if remainder.is_empty() {
        return true;
    }

    !FEATURE_MISSING_MARKERS
        .iter()
        .any(|marker| remainder.contains(marker))
}

/// Probes whether the hypervisor can actually start a VM.
///
/// Prefers echoing through an already-registered distro; falls back to
/// importing a scratch distro from an empty tar and reading the
/// import's own error output.
pub async fn virtualization_available() -> Result<bool> {
    let existing = crate::distro::first_registered().await?;

    if let Some(distro) = existing {
        let out = Exec::new()
            .distro(&distro)
            .run(&["echo", ECHO_PROBE])
            .await?;
        let all = out.all_out();

        if all.contains("HCS_E_HYPERV_NOT_INSTALLED") {
            return Ok(false);
        }
        if all.contains(ECHO_PROBE) {
            return Ok(true);
        }
        tracing::warn!(distro, "Echo probe inconclusive, falling back to scratch import");
    }

    scratch_import_probe().await
}

/// Imports an empty tar into a temp dir and classifies the output.
async fn scratch_import_probe() -> Result<bool> {
    let dir = tempfile::tempdir()?;
    let tar = dir.path().join("probe.tar");
    // A tar end-of-archive is two 512-byte zero blocks.
    std::fs::write(&tar, [0u8; 1024])?;

    let out = Exec::new()
        .run(&[
            "--import",
            SCRATCH_DISTRO,
            &dir.path().to_string_lossy(),
            &tar.to_string_lossy(),
            "--version",
            "2",
        ])
        .await?;

    if out.all_out().contains("HCS_E_HYPERV_NOT_INSTALLED") {
        return Ok(false);
    }

    let _ = crate::distro::unregister(SCRATCH_DISTRO).await;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parse_and_order() {
        let version: WslVersion = "2.3.24".parse().unwrap();
        assert_eq!(version, WslVersion::new(2, 3, 24));
        assert!(version >= MIN_WSL_VERSION);

        let old: WslVersion = "2.1.5".parse().unwrap();
        assert!(old < MIN_WSL_VERSION);

        let newer: WslVersion = "2.4.0".parse().unwrap();
        assert!(newer > MIN_WSL_VERSION);
    }

    #[test]
    fn version_line_extraction() {
        let output = "WSL version: 2.3.24.0\r\nKernel version: 5.15.153.1-2\r\n";
        assert_eq!(
            parse_version_output(output).unwrap(),
            WslVersion::new(2, 3, 24)
        );
    }

    #[test]
    fn garbage_version_is_an_error() {
        assert!(parse_version_output("no digits here").is_err());
    }

    #[test]
    fn healthy_status_passes() {
        let status = "Default Distribution: ovm-alpha\r\nDefault Version: 2\r\n";
        assert!(features_enabled_in_status(status));
        assert!(features_enabled_in_status(""));
    }

    #[test]
    fn missing_feature_status_fails() {
        let status = "Default Version: 2\r\n\
                      The Windows Subsystem for Linux optional component is not enabled. \
                      Please enable it and try again.\r\n";
        assert!(!features_enabled_in_status(status));

        let bios = "Default Distribution: x\r\nDefault Version: 2\r\n\
                    Please enable virtualization in the BIOS.\r\n";
        assert!(!features_enabled_in_status(bios));
    }

    #[test]
    fn windows10_install_hint_fails() {
        let status = "WSL is not installed. Run 'wsl.exe --install --no-distribution'.";
        assert!(!features_enabled_in_status(status));
    }

    #[test]
    fn header_lines_do_not_trip_the_keywords() {
        // "wsl.exe" in one of the two header lines must not count.
        let status = "Default Distribution: wsl.exe-managed\r\nDefault Version: 2\r\n";
        assert!(features_enabled_in_status(status));
    }
}
