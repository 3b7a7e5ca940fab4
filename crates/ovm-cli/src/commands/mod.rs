//! CLI surface and shared command plumbing.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ovm_core::BasicOpts;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub mod init;
pub mod migrate;
pub mod run;

/// Windows-side lifecycle controller for a WSL2-hosted VM.
#[derive(Debug, Parser)]
#[command(name = "ovm", version, about)]
pub struct Cli {
    /// Name of the virtual machine.
    #[arg(long, global = true, default_value = "")]
    pub name: String,

    /// Directory receiving the log files.
    #[arg(long, global = true, default_value = "")]
    pub log_path: PathBuf,

    /// Front-end event pipe name (the `foo` in `\\.\pipe\foo`); its
    /// HTTP server must implement `GET /notify?stage=&name=&value=`.
    #[arg(long, global = true)]
    pub event_npipe_name: Option<String>,

    /// Host PID whose death terminates this process (0 disables).
    #[arg(long, global = true, default_value_t = 0)]
    pub bind_pid: u32,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Walk the environment gates until WSL2 can host the VM.
    Init,
    /// Reconcile disk images and run the guest supervisor.
    Run(RunArgs),
    /// Move the disk images to a new directory.
    Migrate(MigrateArgs),
}

/// Arguments of the `run` command.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Directory owning the disk images and the version manifest.
    #[arg(long)]
    pub image_dir: PathBuf,

    /// Path of the zstd-compressed rootfs tar.
    #[arg(long)]
    pub rootfs_path: PathBuf,

    /// Configured layer versions, `rootfs=…,data=…`.
    #[arg(long)]
    pub versions: String,
}

/// Arguments of the `migrate` command.
#[derive(Debug, Clone, Args)]
pub struct MigrateArgs {
    /// Current image directory.
    #[arg(long)]
    pub old_image_dir: PathBuf,

    /// Target image directory.
    #[arg(long)]
    pub new_image_dir: PathBuf,
}

impl Cli {
    /// Builds the shared options; `require_event_pipe` matches the
    /// commands that report to the front-end.
    pub fn basic_opts(&self, require_event_pipe: bool) -> Result<BasicOpts> {
        if self.name.is_empty() {
            anyhow::bail!("--name is required");
        }
        if self.log_path.as_os_str().is_empty() {
            anyhow::bail!("--log-path is required");
        }

        let event_pipe_name = match self.event_npipe_name {
            Some(ref name) if !name.is_empty() => name.clone(),
            _ if require_event_pipe => anyhow::bail!("--event-npipe-name is required"),
            _ => String::new(),
        };

        Ok(BasicOpts {
            name: self.name.clone(),
            log_path: self.log_path.clone(),
            event_pipe_name,
            bind_pid: self.bind_pid,
        })
    }
}

/// Long-lived tasks of one command: the first failure cancels the
/// rest, and `wait` reports it once everything wound down.
pub struct TaskGroup {
    tasks: JoinSet<()>,
    cancel: CancellationToken,
    first_err: Arc<Mutex<Option<anyhow::Error>>>,
}

impl TaskGroup {
    /// Creates a group bound to `cancel`.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel,
            first_err: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawns a task; its error cancels the group.
    pub fn spawn(&mut self, fut: impl Future<Output = Result<()>> + Send + 'static) {
        let cancel = self.cancel.clone();
        let first_err = self.first_err.clone();

        self.tasks.spawn(async move {
            if let Err(e) = fut.await {
                let mut slot = first_err.lock().expect("task group lock poisoned");
                if slot.is_none() {
                    *slot = Some(e);
                }
                drop(slot);
                cancel.cancel();
            }
        });
    }

    /// Cancels the group.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Joins all tasks and returns the first error. Tasks only end on
    /// failure-driven or explicit cancellation, so a group that is
    /// still healthy blocks here — that is the run command's steady
    /// state.
    pub async fn wait(mut self) -> Result<()> {
        while self.tasks.join_next().await.is_some() {}

        let mut slot = self.first_err.lock().expect("task group lock poisoned");
        match slot.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Cancels the group and joins everything.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel();
        self.wait().await
    }

    /// First error recorded so far, as text.
    #[must_use]
    pub fn first_error_text(&self) -> Option<String> {
        self.first_err
            .lock()
            .expect("task group lock poisoned")
            .as_ref()
            .map(|e| format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_command() {
        let cli = Cli::parse_from([
            "ovm",
            "--name",
            "alpha",
            "--log-path",
            "C:\\logs",
            "--event-npipe-name",
            "fe",
            "run",
            "--image-dir",
            "C:\\images",
            "--rootfs-path",
            "C:\\rootfs.tar.zst",
            "--versions",
            "rootfs=v1,data=v1",
        ]);

        assert_eq!(cli.name, "alpha");
        assert_eq!(cli.bind_pid, 0);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.versions, "rootfs=v1,data=v1");
                assert_eq!(args.image_dir, PathBuf::from("C:\\images"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn init_requires_event_pipe() {
        let cli = Cli::parse_from(["ovm", "--name", "a", "--log-path", "l", "init"]);
        assert!(cli.basic_opts(true).is_err());
        assert!(cli.basic_opts(false).is_ok());
    }

    #[test]
    fn global_flags_may_follow_the_subcommand() {
        let cli = Cli::parse_from([
            "ovm",
            "migrate",
            "--old-image-dir",
            "old",
            "--new-image-dir",
            "new",
            "--name",
            "alpha",
            "--log-path",
            "logs",
        ]);
        assert_eq!(cli.name, "alpha");
    }

    #[tokio::test]
    async fn task_group_reports_first_error_and_cancels() {
        let cancel = CancellationToken::new();
        let mut group = TaskGroup::new(cancel.clone());

        group.spawn(async { Err(anyhow::anyhow!("boom")) });
        let watcher = cancel.clone();
        group.spawn(async move {
            watcher.cancelled().await;
            Ok(())
        });

        let err = group.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
