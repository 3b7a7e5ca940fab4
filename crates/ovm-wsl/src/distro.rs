//! Distro lifecycle operations.
//!
//! States: absent → registered → running → registered → absent.
//! Import registers, the first command starts, terminate/shutdown
//! stops, unregister removes.

use crate::classify::WslFailure;
use crate::error::{Result, WslError};
use crate::invoke::{wsl_exec, wsl_invoke};
use std::collections::HashSet;
use std::path::Path;

/// Guest supervisor path inside the distro.
pub const OVMD: &str = "/opt/ovmd";

/// Shuts down the whole WSL VM.
pub async fn shutdown() -> Result<()> {
    wsl_exec(&["--shutdown"]).await?;
    Ok(())
}

/// Stops a single distro.
pub async fn terminate(distro: &str) -> Result<()> {
    wsl_exec(&["--terminate", distro]).await?;
    Ok(())
}

/// Imports `tar` as a WSL2 distro rooted at `install_path`.
pub async fn import_distro(distro: &str, install_path: &Path, tar: &Path) -> Result<()> {
    wsl_exec(&[
        "--import",
        distro,
        &install_path.to_string_lossy(),
        &tar.to_string_lossy(),
        "--version",
        "2",
    ])
    .await?;
    Ok(())
}

/// Removes a distro registration and its rootfs disk.
pub async fn unregister(distro: &str) -> Result<()> {
    wsl_exec(&["--unregister", distro]).await?;
    Ok(())
}

/// Bare-mounts VHDX files into the WSL VM.
///
/// Idempotent: a disk that is already attached is accepted.
pub async fn mount_vhdx(paths: &[&Path]) -> Result<()> {
    for path in paths {
        let path_str = path.to_string_lossy();
        match wsl_exec(&["--mount", "--bare", "--vhd", &path_str]).await {
            Ok(_) => {}
            Err(e) if e.failure() == WslFailure::VhdAlreadyAttached => {
                tracing::info!("VHDX already mounted: {path_str}");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Detaches VHDX files from the WSL VM.
///
/// Idempotent: files that do not exist are skipped, and a disk that is
/// not attached is accepted.
pub async fn umount_vhdx(paths: &[&Path]) -> Result<()> {
    for path in paths {
        if !path.exists() {
            continue;
        }

        let path_str = path.to_string_lossy();
        match wsl_exec(&["--unmount", &path_str]).await {
            Ok(_) => {}
            Err(e) if e.failure() == WslFailure::FileNotFound => {
                tracing::info!("VHDX already unmounted: {path_str}");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Moves a registered, stopped distro to a new directory.
///
/// # Errors
///
/// [`WslError::SharingViolation`] when the distro's files are still
/// held open; the caller shuts WSL down and retries.
pub async fn move_distro(distro: &str, new_path: &Path) -> Result<()> {
    match wsl_exec(&["--manage", distro, "--move", &new_path.to_string_lossy()]).await {
        Ok(_) => Ok(()),
        Err(e) if e.failure() == WslFailure::SharingViolation => Err(WslError::SharingViolation),
        Err(e) => Err(e),
    }
}

/// Whether `distro` is registered (running or not).
pub async fn is_registered(distro: &str) -> Result<bool> {
    Ok(list_distros(false).await?.contains(distro))
}

/// Returns any registered distro, if one exists.
pub async fn first_registered() -> Result<Option<String>> {
    Ok(list_distros(false).await?.into_iter().next())
}

/// Whether `distro` is currently running.
pub async fn is_running(distro: &str) -> Result<bool> {
    Ok(list_distros(true).await?.contains(distro))
}

/// Flushes the distro's disks (`wsl -d <d> sync`).
pub async fn sync_disk(distro: &str) -> Result<()> {
    wsl_invoke(distro, &["sync"]).await
}

/// Syncs only when the distro is actually running.
///
/// # Errors
///
/// [`WslError::DistroNotExist`] / [`WslError::DistroNotRunning`] are
/// the expected pre-check outcomes, matched by callers.
pub async fn safe_sync_disk(distro: &str) -> Result<()> {
    if !is_registered(distro).await.map_err(|e| {
        WslError::setup(format!("cannot sync {distro}, registration check failed: {e}"))
    })? {
        return Err(WslError::DistroNotExist);
    }

    if !is_running(distro).await.map_err(|e| {
        WslError::setup(format!("cannot sync {distro}, running check failed: {e}"))
    })? {
        return Err(WslError::DistroNotRunning);
    }

    let _ = sync_disk(distro).await;
    Ok(())
}

/// Graceful stop: sync, ask the supervisor to kill its children, then
/// terminate the distro.
pub async fn request_stop(distro: &str) -> Result<()> {
    let _ = sync_disk(distro).await;

    wsl_invoke(distro, &[OVMD, "--killall"])
        .await
        .map_err(|e| WslError::setup(format!("failed to request stop: {e}")))?;

    terminate(distro)
        .await
        .map_err(|e| WslError::setup(format!("failed to terminate in request stop: {e}")))
}

/// Plain stop: sync and terminate, without involving the supervisor.
pub async fn stop(distro: &str) -> Result<()> {
    let _ = sync_disk(distro).await;

    terminate(distro)
        .await
        .map_err(|e| WslError::setup(format!("failed to terminate in stop: {e}")))
}

/// Lists registered (or running) distros.
///
/// `wsl --list --quiet` prints one name per line; the first
/// whitespace field is the distro name.
async fn list_distros(running: bool) -> Result<HashSet<String>> {
    let mut args = vec!["--list", "--quiet"];
    args.push(if running { "--running" } else { "--all" });

    let stdout = wsl_exec(&args).await?;
    Ok(parse_distro_list(&stdout))
}

fn parse_distro_list(output: &str) -> HashSet<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quiet_list_output() {
        let distros = parse_distro_list("Ubuntu\r\novm-alpha\r\nDebian\r\n");
        assert!(distros.contains("Ubuntu"));
        assert!(distros.contains("ovm-alpha"));
        assert!(distros.contains("Debian"));
        assert_eq!(distros.len(), 3);
    }

    #[test]
    fn takes_first_field_and_skips_blank_lines() {
        let distros = parse_distro_list("Ubuntu (Default)\n\n  \nAlpine\n");
        assert!(distros.contains("Ubuntu"));
        assert!(distros.contains("Alpine"));
        assert_eq!(distros.len(), 2);
    }

    #[test]
    fn empty_output_is_empty_set() {
        assert!(parse_distro_list("").is_empty());
    }
}
