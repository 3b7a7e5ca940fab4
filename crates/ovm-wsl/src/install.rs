//! WSL optional-feature installation.
//!
//! Enabling `Microsoft-Windows-Subsystem-Linux` and
//! `VirtualMachinePlatform` needs admin rights and a reboot. A
//! non-admin controller relaunches itself elevated and waits; the
//! elevated copy runs the `dism` calls and exits.

use crate::error::{Result, WslError};
use crate::invoke::silent_status;
use ovm_core::{Capabilities, EventName, Notifier};
use std::path::Path;

/// `dism`/MSI exit codes that count as success.
///
/// 1641 and 3010 mean "reboot initiated/required", which is the
/// expected outcome here.
/// Ref: <https://learn.microsoft.com/en-us/windows/win32/msi/error-codes>
const MSI_SUCCESS_CODES: &[i32] = &[0, 1641, 3010];

/// Shared context for the feature-install flow.
pub struct InstallCtx<'a> {
    /// Event notifier.
    pub notifier: &'a Notifier,
    /// Capability flags.
    pub caps: &'a Capabilities,
    /// Log directory for the dism log.
    pub log_dir: &'a Path,
    /// VM name, used in log file names.
    pub name: &'a str,
    /// Whether this process is the elevated child.
    pub is_elevated_process: bool,
}

/// Enables the WSL2 optional features.
///
/// Non-admin: relaunch elevated, wait, then flip `CanReboot` and emit
/// the success/NeedReboot pair. Admin (typically the elevated child):
/// run dism directly.
pub async fn install(ctx: &InstallCtx<'_>) -> Result<()> {
    if !ctx.is_elevated_process {
        ctx.notifier.notify(EventName::EnableFeaturing);
    }

    if !ovm_win32::elevation::is_admin() {
        tracing::info!("Not running with admin privileges, relaunching elevated");

        // The elevated child blocks this call until it exits.
        let relaunch =
            tokio::task::spawn_blocking(ovm_win32::elevation::relaunch_elevated_wait).await;
        if let Err(e) = relaunch.unwrap_or_else(|e| Err(ovm_win32::Win32Error::Io(e.into()))) {
            ctx.notifier.notify(EventName::EnableFeatureFailed);
            return Err(WslError::setup(format!("failed to run as admin: {e}")));
        }

        tracing::info!("Elevated process finished successfully");
        finish_enable(ctx).await;
        return Ok(());
    }

    tracing::info!("Ready to enable WSL2 features");
    if let Err(e) = enable_features(ctx.log_dir, ctx.name).await {
        if !ctx.is_elevated_process {
            ctx.notifier.notify(EventName::EnableFeatureFailed);
        }
        return Err(e);
    }

    tracing::info!("WSL2 features enabled, system reboot required");
    if ctx.is_elevated_process {
        // The parent observes our exit code; events are its job.
        return Ok(());
    }

    finish_enable(ctx).await;
    Ok(())
}

async fn finish_enable(ctx: &InstallCtx<'_>) {
    ctx.caps.set_can_enable_feature(false);
    ctx.caps.set_can_reboot(true);
    ctx.notifier.notify(EventName::EnableFeatureSuccess);
    ctx.notifier.notify_terminal(EventName::NeedReboot).await;
}

/// Runs the two dism enablements.
async fn enable_features(log_dir: &Path, name: &str) -> Result<()> {
    let dism = Path::new("dism");

    let code = silent_status(
        dism,
        &[
            "/online",
            "/enable-feature",
            "/featurename:Microsoft-Windows-Subsystem-Linux",
            "/all",
            "/norestart",
        ],
    )
    .await?;
    if !is_dism_success(code) {
        return Err(WslError::setup(format!(
            "dism enable Microsoft-Windows-Subsystem-Linux failed (exit {code:?})"
        )));
    }

    let dism_log = ovm_core::logging::create_aux_log(log_dir, &format!("{name}-dism"))?;
    let log_param = format!("/logpath:{}", dism_log.display());

    let code = silent_status(
        dism,
        &[
            "/online",
            "/enable-feature",
            "/featurename:VirtualMachinePlatform",
            "/all",
            "/norestart",
            &log_param,
            "/loglevel:4",
        ],
    )
    .await?;
    if !is_dism_success(code) {
        return Err(WslError::setup(format!(
            "dism enable VirtualMachinePlatform failed (exit {code:?})"
        )));
    }

    Ok(())
}

fn is_dism_success(code: Option<i32>) -> bool {
    code.is_some_and(|c| MSI_SUCCESS_CODES.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reboot_required_codes_are_success() {
        assert!(is_dism_success(Some(0)));
        assert!(is_dism_success(Some(1641)));
        assert!(is_dism_success(Some(3010)));
    }

    #[test]
    fn other_codes_are_failures() {
        assert!(!is_dism_success(Some(1)));
        assert!(!is_dism_success(Some(740)));
        assert!(!is_dism_success(None));
    }
}
