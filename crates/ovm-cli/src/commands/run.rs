//! The `run` command: reconcile disk images, then launch and babysit
//! the guest supervisor.

use super::{Cli, RunArgs, TaskGroup};
use crate::assets;
use anyhow::{Context, Result};
use ovm_core::{EventName, Notifier, RunOpts, Stage};
use ovm_ipc::{PipeEventTransport, StopLatch};
use ovm_ipc::run_routes::{RunState, run_router};
use ovm_update::Updater;
use ovm_wsl::launch::{LaunchCtx, launch};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// First candidate port of the guest container endpoint.
const PODMAN_START_PORT: u16 = 7591;

pub async fn execute(cli: &Cli, args: RunArgs) -> Result<()> {
    let basic = cli.basic_opts(true)?;
    let opts = RunOpts::new(basic, args.image_dir, args.rootfs_path, &args.versions)?;

    ovm_core::logging::init(&opts.basic.log_path, &opts.basic.name, false, true)?;

    let notifier = Notifier::new(
        Stage::Run,
        Arc::new(PipeEventTransport::new(opts.basic.event_endpoint())),
    );

    let result = start(&opts, &notifier).await;

    match result {
        Ok(()) => {
            notifier.notify_terminal(EventName::RunExit).await;
            Ok(())
        }
        Err(e) => {
            notifier.notify_error(&format!("{e:#}"));
            notifier.notify_terminal(EventName::RunExit).await;
            Err(e)
        }
    }
}

async fn start(opts: &RunOpts, notifier: &Arc<Notifier>) -> Result<()> {
    let distro = opts.basic.distro_name();

    // Bring the disk layers up to the configured versions first; the
    // launch depends on both disks existing.
    Updater::new(opts, notifier)
        .check_and_replace()
        .await
        .context("failed to update disk images")?;

    if !ovm_update::rootfs_materialised(&opts.image_dir) {
        tracing::warn!("Rootfs disk missing after reconciliation");
    }

    let podman_port =
        ovm_core::net::find_usable_port(PODMAN_START_PORT).context("failed to find a usable port")?;
    tracing::info!(podman_port, "Selected container endpoint port");

    assets::setup_source_code_disk(&opts.image_dir)?;

    let caps = Arc::new(ovm_core::Capabilities::new());
    let stop_latch = Arc::new(StopLatch::new());
    let cancel = CancellationToken::new();

    let state = RunState {
        distro: distro.clone(),
        podman_port,
        caps: caps.clone(),
        stop_latch: stop_latch.clone(),
    };

    let mut group = TaskGroup::new(cancel.clone());
    {
        let endpoint = opts.basic.run_restful_endpoint();
        let router = run_router(state);
        let cancel = cancel.clone();
        let latch = stop_latch.clone();
        group.spawn(async move {
            ovm_ipc::serve(&endpoint, router, cancel, Some(latch))
                .await
                .context("RESTful server failed")
        });
    }
    {
        let cancel = cancel.clone();
        let pid = opts.basic.bind_pid;
        group.spawn(async move {
            ovm_core::watchdog::wait_bind_pid(&cancel, pid)
                .await
                .context("bind pid watch failed")
        });
    }
    {
        let cancel = cancel.clone();
        let notifier = notifier.clone();
        let ctx = LaunchCtx {
            distro: distro.clone(),
            name: opts.basic.name.clone(),
            image_dir: opts.image_dir.clone(),
            podman_port,
        };
        group.spawn(async move {
            tokio::select! {
                // Dropping the launch future tears the supervisor
                // process down with it.
                () = cancel.cancelled() => Ok(()),
                result = launch(&notifier, &ctx) => result.map_err(anyhow::Error::from),
            }
        });
    }

    let result = group.wait().await;

    if caps.stopped_with_api() {
        // The front-end asked for the stop; the launch loop's exit is
        // the expected outcome, not a failure.
        tracing::info!("Stopped through the control API");
        return Ok(());
    }

    // Best-effort teardown of the distro on the way out.
    tracing::info!("Stopping distro...");
    if let Err(e) = ovm_wsl::distro::request_stop(&distro).await {
        tracing::warn!("Failed to stop distro {distro}: {e}");
    }
    tracing::info!("Distro stopped");

    result
}
