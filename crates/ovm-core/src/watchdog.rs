//! Bind-PID watchdog.
//!
//! The front-end hands us its own PID; when that process disappears
//! this controller has no reason to keep the VM alive.

use crate::error::{CoreError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Watches `pid` until it exits or the command is cancelled.
///
/// A pid of 0 disables the watchdog: the task parks on cancellation.
///
/// # Errors
///
/// Returns [`CoreError::BindPidExited`] when the bound process is gone,
/// which the caller turns into group cancellation.
pub async fn wait_bind_pid(cancel: &CancellationToken, pid: u32) -> Result<()> {
    if pid == 0 {
        tracing::info!("bind pid is 0, nothing to watch");
        cancel.cancelled().await;
        return Ok(());
    }

    tracing::info!(pid, "Watching bind pid");

    loop {
        if cancel.is_cancelled() {
            tracing::info!("Bind pid watch cancelled");
            return Ok(());
        }

        if !ovm_win32::process::process_exists(pid)? {
            return Err(CoreError::BindPidExited(pid));
        }

        tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!("Bind pid watch cancelled");
                return Ok(());
            }
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pid_zero_parks_until_cancelled() {
        let cancel = CancellationToken::new();
        let watch = {
            let cancel = cancel.clone();
            tokio::spawn(async move { wait_bind_pid(&cancel, 0).await })
        };

        tokio::task::yield_now().await;
        assert!(!watch.is_finished());

        cancel.cancel();
        watch.await.unwrap().unwrap();
    }
}
