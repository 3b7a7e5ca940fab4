//! One-shot gates between the orchestrator and the REST handlers.
//!
//! Each gate is a future-like value completed exactly once (by a REST
//! handler) and awaited by exactly one party (the parked orchestrator
//! state machine). A second completion is a logged no-op instead of a
//! panic, which the buffered-channel construction this replaces could
//! not guarantee.

use std::sync::Mutex;
use tokio::sync::oneshot;

/// A value that can be completed once and awaited once.
#[derive(Debug)]
pub struct Gate<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
    rx: tokio::sync::Mutex<Option<oneshot::Receiver<T>>>,
}

impl<T> Gate<T> {
    /// Creates an open gate.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(Some(rx)),
        }
    }

    /// Completes the gate. Returns `false` when it was already
    /// completed (or the waiter is gone).
    pub fn complete(&self, value: T) -> bool {
        let sender = self.tx.lock().expect("gate lock poisoned").take();
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                tracing::warn!("gate completed more than once");
                false
            }
        }
    }

    /// Waits for completion. Returns `None` if the gate can no longer
    /// be completed or a second waiter shows up.
    pub async fn wait(&self) -> Option<T> {
        let receiver = self.rx.lock().await.take()?;
        receiver.await.ok()
    }
}

impl<T> Default for Gate<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// How the front-end chose to resolve a `.wslconfig` incompatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WslConfigFix {
    /// The offending keys were commented out in place.
    Auto,
    /// The file was opened for manual editing; a WSL shutdown follows.
    Open,
    /// The check is skipped from now on.
    Skip,
}

/// The typed channels connecting REST handlers to parked gates.
///
/// `wsl_updated` doubles as the environment-ready signal: the version
/// gate parks on it and the `/update-wsl` handler completes it.
#[derive(Debug, Default)]
pub struct GateBus {
    /// The WSL runtime was updated.
    pub wsl_updated: Gate<()>,
    /// `.wslconfig` was fixed, opened, or skipped.
    pub wsl_config_updated: Gate<WslConfigFix>,
    /// WSL was shut down after a manual config edit.
    pub wsl_shutdown: Gate<()>,
}

impl GateBus {
    /// Creates a bus with all gates open.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_once() {
        let gate = Gate::new();
        assert!(gate.complete(7));
        assert_eq!(gate.wait().await, Some(7));
    }

    #[tokio::test]
    async fn double_complete_is_a_noop() {
        let gate = Gate::new();
        assert!(gate.complete(1));
        assert!(!gate.complete(2));
        assert_eq!(gate.wait().await, Some(1));
    }

    #[tokio::test]
    async fn second_wait_returns_none() {
        let gate = Gate::new();
        gate.complete(());
        assert_eq!(gate.wait().await, Some(()));
        assert_eq!(gate.wait().await, None);
    }

    #[tokio::test]
    async fn wait_parks_until_completed() {
        let gate = std::sync::Arc::new(Gate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };

        tokio::task::yield_now().await;
        gate.complete(WslConfigFix::Open);

        assert_eq!(waiter.await.unwrap(), Some(WslConfigFix::Open));
    }
}
