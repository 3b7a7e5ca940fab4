//! The `init` command: gated preparation of the WSL2 environment.
//!
//! Gates run strictly in order; each either passes (log, proceed) or
//! blocks (emit the event, grant the capability, park on the gate the
//! paired REST route completes). The elevated child short-circuits:
//! it only exists to run the feature install.

use super::{Cli, TaskGroup};
use anyhow::{Context, Result, anyhow};
use ovm_core::{BasicOpts, Capabilities, EventName, GateBus, Notifier, Stage, WslConfigFix};
use ovm_ipc::PipeEventTransport;
use ovm_ipc::init_routes::{InitState, init_router};
use ovm_wsl::config::{WslConfig, skip_marker_exists};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio_util::sync::CancellationToken;

pub async fn execute(cli: &Cli) -> Result<()> {
    let mut opts = cli.basic_opts(true)?;

    let is_elevated_child = ovm_win32::elevation::is_elevated_child()
        .context("failed to check for an elevated child process")?;
    if is_elevated_child {
        // Route our console to the invoking process before anything
        // is printed.
        if let Err(e) = ovm_win32::console::attach_parent_console() {
            eprintln!("ovm: cannot attach parent console: {e}");
        }
    }

    opts.validate()?;
    ovm_core::logging::init(
        &opts.log_path,
        &format!("init-{}", opts.name),
        is_elevated_child,
        false,
    )?;

    if is_elevated_child {
        return execute_elevated(&opts).await;
    }

    let notifier = Notifier::new(
        Stage::Init,
        Arc::new(PipeEventTransport::new(opts.event_endpoint())),
    );

    let result = start(&opts, &notifier).await;

    match result {
        Ok(()) => {
            notifier.notify(EventName::InitSuccess);
            notifier.notify_terminal(EventName::InitExit).await;
            Ok(())
        }
        Err(e) => {
            notifier.notify_error(&format!("{e:#}"));
            notifier.notify_terminal(EventName::InitExit).await;
            Err(e)
        }
    }
}

/// The elevated child's whole job: enable the features and exit. The
/// parent reads the exit code; events stay its responsibility.
async fn execute_elevated(opts: &BasicOpts) -> Result<()> {
    tracing::info!("Running as elevated child");

    let caps = Capabilities::new();
    let notifier = Notifier::disabled(Stage::Init);

    let ctx = ovm_wsl::install::InstallCtx {
        notifier: &notifier,
        caps: &caps,
        log_dir: &opts.log_path,
        name: &opts.name,
        is_elevated_process: true,
    };

    ovm_wsl::install::install(&ctx)
        .await
        .context("failed to enable WSL2 features")
}

async fn start(opts: &BasicOpts, notifier: &Arc<Notifier>) -> Result<()> {
    if !ovm_wsl::check::windows_build_supported() {
        notifier.notify(EventName::SystemNotSupport);
        return Err(anyhow!(
            "WSL2 is not supported on this system, Windows build {} or newer is required",
            ovm_wsl::check::MIN_WINDOWS_BUILD
        ));
    }

    let caps = Arc::new(Capabilities::new());
    let gates = Arc::new(GateBus::new());
    let cancel = CancellationToken::new();

    let state = InitState {
        opts: opts.clone(),
        caps: caps.clone(),
        gates: gates.clone(),
        notifier: notifier.clone(),
        shutdown_armed: Arc::new(AtomicBool::new(false)),
    };

    let mut group = TaskGroup::new(cancel.clone());
    {
        let endpoint = opts.init_restful_endpoint();
        let router = init_router(state);
        let cancel = cancel.clone();
        group.spawn(async move {
            ovm_ipc::serve(&endpoint, router, cancel, None)
                .await
                .context("RESTful server failed")
        });
    }
    {
        let cancel = cancel.clone();
        let pid = opts.bind_pid;
        group.spawn(async move {
            ovm_core::watchdog::wait_bind_pid(&cancel, pid)
                .await
                .context("bind pid watch failed")
        });
    }

    let gates_result = run_gates(opts, notifier, &caps, &gates, &cancel).await;

    // Attribute a cancellation to whichever task caused it.
    let cause = group.first_error_text();
    let group_result = group.shutdown().await;

    match gates_result {
        Ok(()) => group_result,
        Err(e) => match cause {
            Some(cause) => Err(e.context(cause)),
            None => Err(e),
        },
    }
}

/// Walks the four environment gates in order.
async fn run_gates(
    opts: &BasicOpts,
    notifier: &Notifier,
    caps: &Capabilities,
    gates: &GateBus,
    cancel: &CancellationToken,
) -> Result<()> {
    // Gate 1: WSL runtime version.
    if ovm_wsl::check::needs_wsl_update().await {
        tracing::info!("WSL runtime needs an update");
        notifier.notify(EventName::NeedUpdateWSL);
        caps.set_can_update_wsl(true);

        tokio::select! {
            () = cancel.cancelled() => {
                return Err(anyhow!("cancelled while waiting for the WSL update"));
            }
            updated = gates.wsl_updated.wait() => {
                updated.ok_or_else(|| anyhow!("update gate closed unexpectedly"))?;
                tracing::info!("WSL runtime was updated");
            }
        }
    } else {
        tracing::info!("WSL runtime is up to date");
    }

    // Gate 2: optional features. The enable flow ends in a reboot, so
    // there is nothing to resume here; the process parks until the
    // front-end reboots the machine or tears us down.
    if !ovm_wsl::check::features_enabled().await {
        tracing::info!("WSL2 features are not enabled");
        notifier.notify(EventName::NeedEnableFeature);
        caps.set_can_enable_feature(true);

        cancel.cancelled().await;
        return Err(anyhow!("cancelled while waiting for feature enablement"));
    }
    tracing::info!("WSL2 features are enabled");

    // Gate 3: can the hypervisor actually start a VM?
    match ovm_wsl::check::virtualization_available().await {
        Ok(true) => tracing::info!("Virtualization probe passed"),
        Ok(false) => {
            notifier.notify(EventName::NotSupportVirtualization);
            cancel.cancelled().await;
            return Err(anyhow!("virtualization is disabled in firmware"));
        }
        Err(e) => return Err(anyhow!(e).context("virtualization probe failed")),
    }

    // Gate 4: host .wslconfig compatibility.
    if skip_marker_exists(&opts.name) {
        tracing::info!("wslconfig check skipped by marker");
        return Ok(());
    }

    let incompatible = WslConfig::new().incompatible_keys();
    if incompatible.is_empty() {
        tracing::info!("wslconfig carries no incompatible keys");
        return Ok(());
    }

    tracing::info!(keys = %incompatible.join(","), "wslconfig carries incompatible keys");
    notifier.notify_value(EventName::WSLConfigMaybeIncompatible, incompatible.join(","));
    caps.set_can_fix_wsl_config(true);

    let method = tokio::select! {
        () = cancel.cancelled() => {
            return Err(anyhow!("cancelled while waiting for the wslconfig fix"));
        }
        method = gates.wsl_config_updated.wait() => {
            method.ok_or_else(|| anyhow!("wslconfig gate closed unexpectedly"))?
        }
    };

    if method == WslConfigFix::Open {
        // Manual edit: wait for the explicit WSL shutdown that makes
        // the edit effective.
        tokio::select! {
            () = cancel.cancelled() => {
                return Err(anyhow!("cancelled while waiting for the WSL shutdown"));
            }
            shutdown = gates.wsl_shutdown.wait() => {
                shutdown.ok_or_else(|| anyhow!("shutdown gate closed unexpectedly"))?;
            }
        }
    }

    Ok(())
}
