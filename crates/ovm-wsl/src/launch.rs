//! Guest supervisor launch loop.
//!
//! Mounts the data disks, spawns `/opt/ovmd` inside the distro with
//! its output mirrored into the vm log, and in parallel polls the
//! container endpoint until it answers. Returns when the supervisor
//! exits (always an error: a healthy supervisor outlives us) or the
//! readiness probe gives up.

use crate::distro::{OVMD, mount_vhdx};
use crate::error::{Result, WslError};
use crate::find::find_wsl;
use crate::invoke::{render, silent_command};
use ovm_core::manifest::{DATA_DISK, SOURCECODE_DISK};
use ovm_core::{EventName, Notifier};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Grace period before the first readiness poll; the supervisor first
/// kills leftover engine processes from a previous run.
const READY_GRACE: Duration = Duration::from_secs(1);
/// Poll cadence of the readiness probe.
const READY_INTERVAL: Duration = Duration::from_millis(200);
/// Readiness deadline.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Inputs of one launch.
#[derive(Debug, Clone)]
pub struct LaunchCtx {
    /// Distro to launch in.
    pub distro: String,
    /// VM name (sizes the data disk).
    pub name: String,
    /// Image directory holding the disks.
    pub image_dir: PathBuf,
    /// Host port of the guest container endpoint.
    pub podman_port: u16,
}

/// Runs the launch loop to completion.
pub async fn launch(notifier: &Notifier, ctx: &LaunchCtx) -> Result<()> {
    notifier.notify(EventName::Starting);

    let data_disk = ctx.image_dir.join(DATA_DISK);
    let sourcecode_disk = ctx.image_dir.join(SOURCECODE_DISK);

    let mut disks = vec![data_disk.as_path()];
    if sourcecode_disk.exists() {
        disks.push(sourcecode_disk.as_path());
    }
    mount_vhdx(&disks)
        .await
        .map_err(|e| WslError::setup(format!("failed to mount vhdx disks: {e}")))?;

    tokio::try_join!(run_supervisor(ctx), wait_ready(notifier, ctx.podman_port))?;
    Ok(())
}

/// Spawns ovmd and mirrors its output until it exits.
async fn run_supervisor(ctx: &LaunchCtx) -> Result<()> {
    let port = ctx.podman_port.to_string();
    let new_sectors = ovm_core::disk::data_sectors(&ctx.name);
    // The legacy size term hashed the image dir too; the guest gets
    // both so previously-created disks are still recognized.
    let old_sectors =
        ovm_core::disk::data_sectors(&format!("{}{}", ctx.name, ctx.image_dir.display()));
    let sectors = format!("{new_sectors},{old_sectors}");

    let args = [
        "-d", &ctx.distro, OVMD, "-p", &port, "-s", &sectors,
    ];

    let wsl = find_wsl();
    tracing::info!(
        distro = %ctx.distro,
        port = ctx.podman_port,
        sectors = %sectors,
        "Launching guest supervisor: {}",
        render(wsl, &args)
    );

    let mut child = silent_command(wsl, &args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| WslError::setup(format!("failed to start `{}`: {e}", ctx.distro)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| WslError::setup("could not take supervisor stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| WslError::setup("could not take supervisor stderr"))?;

    tokio::spawn(mirror_lines(stdout));
    tokio::spawn(mirror_lines(stderr));

    let status = child
        .wait()
        .await
        .map_err(|e| WslError::setup(format!("failed to wait for supervisor: {e}")))?;

    if !status.success() {
        return Err(WslError::setup(format!(
            "failed to launch ovmd for `{}`: {status}",
            ctx.distro
        )));
    }

    // A clean exit is still unexpected; the supervisor is supposed to
    // run until it is told to stop.
    Err(WslError::setup("ovmd unexpectedly closed"))
}

/// Mirrors one output stream line-by-line into the vm log.
async fn mirror_lines(stream: impl tokio::io::AsyncRead + Unpin) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "vm", "{line}");
    }
}

/// Polls the libpod endpoint until it answers, then emits `Ready`.
async fn wait_ready(notifier: &Notifier, port: u16) -> Result<()> {
    tokio::time::sleep(READY_GRACE).await;

    // See: https://docs.podman.io/en/latest/_static/api.html#tag/images/operation/ImageListLibpod
    let url = format!("http://127.0.0.1:{port}/libpod/images/json");
    let client = reqwest::Client::builder()
        .timeout(READY_INTERVAL * 2)
        .build()?;

    let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
    loop {
        if let Ok(response) = client.get(&url).send().await {
            if response.status().is_success() {
                tracing::info!(port, "Guest container endpoint is ready");
                notifier.notify(EventName::Ready);
                return Ok(());
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(WslError::setup("guest container endpoint never became ready"));
        }
        tokio::time::sleep(READY_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_terms_differ_between_new_and_legacy() {
        let name = "alpha";
        let image_dir = r"C:\ovm\images";

        let new_sectors = ovm_core::disk::data_sectors(name);
        let old_sectors = ovm_core::disk::data_sectors(&format!("{name}{image_dir}"));

        assert_ne!(new_sectors, old_sectors);
    }
}
