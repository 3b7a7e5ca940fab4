//! Stage event notifier.
//!
//! A fire-and-forget client that mirrors orchestrator progress to the
//! front-end as `stage` / `name` / `value` triples. Producers enqueue
//! without blocking; a single consumer task serialises delivery in
//! enqueue order. Terminal events (`InitExit`, `RunExit`,
//! `NeedReboot`) drain synchronously and close the queue: later sends
//! are no-ops.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Per-request delivery budget; the front-end is local, anything
/// slower is treated as gone.
const SEND_TIMEOUT: Duration = Duration::from_millis(200);

/// The command a notification belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Environment preparation (`init`).
    Init,
    /// Steady-state operation (`run`).
    Run,
}

impl Stage {
    /// Wire name of the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Run => "run",
        }
    }

    /// The stage's fatal-error event.
    #[must_use]
    pub const fn error_event(self) -> EventName {
        match self {
            Self::Init => EventName::InitError,
            Self::Run => EventName::RunError,
        }
    }

    /// The stage's terminal exit event.
    #[must_use]
    pub const fn exit_event(self) -> EventName {
        match self {
            Self::Init => EventName::InitExit,
            Self::Run => EventName::RunExit,
        }
    }
}

/// Typed event names delivered to the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    /// The Windows build cannot host WSL2.
    SystemNotSupport,
    /// CPU virtualization is unavailable in firmware.
    NotSupportVirtualization,
    /// Optional features are disabled; `/enable-feature` unblocks.
    NeedEnableFeature,
    /// Feature enablement started.
    EnableFeaturing,
    /// Feature enablement failed.
    EnableFeatureFailed,
    /// Feature enablement succeeded.
    EnableFeatureSuccess,
    /// A reboot must happen before anything else; terminal.
    NeedReboot,
    /// The WSL runtime is missing or below the floor; `/update-wsl` unblocks.
    NeedUpdateWSL,
    /// WSL runtime update started.
    UpdatingWSL,
    /// WSL runtime update failed.
    UpdateWSLFailed,
    /// WSL runtime update succeeded.
    UpdateWSLSuccess,
    /// `.wslconfig` carries incompatible keys (value = comma-joined list).
    WSLConfigMaybeIncompatible,
    /// All init gates passed.
    InitSuccess,
    /// The init command is exiting; terminal.
    InitExit,
    /// The init command hit a fatal error (value = error text).
    InitError,
    /// Rootfs replacement started.
    UpdatingRootFS,
    /// Rootfs replacement failed.
    UpdateRootFSFailed,
    /// Rootfs replacement succeeded.
    UpdateRootFSSuccess,
    /// Data disk replacement started.
    UpdatingData,
    /// Data disk replacement failed.
    UpdateDataFailed,
    /// Data disk replacement succeeded.
    UpdateDataSuccess,
    /// The guest supervisor is being launched.
    Starting,
    /// The container endpoint answered; the VM is usable.
    Ready,
    /// The run command is exiting; terminal.
    RunExit,
    /// The run command hit a fatal error (value = error text).
    RunError,
}

impl EventName {
    /// Wire name of the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SystemNotSupport => "SystemNotSupport",
            Self::NotSupportVirtualization => "NotSupportVirtualization",
            Self::NeedEnableFeature => "NeedEnableFeature",
            Self::EnableFeaturing => "EnableFeaturing",
            Self::EnableFeatureFailed => "EnableFeatureFailed",
            Self::EnableFeatureSuccess => "EnableFeatureSuccess",
            Self::NeedReboot => "NeedReboot",
            Self::NeedUpdateWSL => "NeedUpdateWSL",
            Self::UpdatingWSL => "UpdatingWSL",
            Self::UpdateWSLFailed => "UpdateWSLFailed",
            Self::UpdateWSLSuccess => "UpdateWSLSuccess",
            Self::WSLConfigMaybeIncompatible => "WSLConfigMaybeIncompatible",
            Self::InitSuccess => "InitSuccess",
            Self::InitExit => "InitExit",
            Self::InitError => "InitError",
            Self::UpdatingRootFS => "UpdatingRootFS",
            Self::UpdateRootFSFailed => "UpdateRootFSFailed",
            Self::UpdateRootFSSuccess => "UpdateRootFSSuccess",
            Self::UpdatingData => "UpdatingData",
            Self::UpdateDataFailed => "UpdateDataFailed",
            Self::UpdateDataSuccess => "UpdateDataSuccess",
            Self::Starting => "Starting",
            Self::Ready => "Ready",
            Self::RunExit => "RunExit",
            Self::RunError => "RunError",
        }
    }

    /// Whether accepting this event closes the notifier.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::InitExit | Self::RunExit | Self::NeedReboot)
    }
}

/// Delivery backend for the notifier; production dials the front-end
/// named pipe, tests record.
#[async_trait]
pub trait EventTransport: Send + Sync + 'static {
    /// Delivers one event. Implementations log non-2xx responses and
    /// do not retry.
    async fn send(&self, stage: Stage, name: &str, value: &str) -> crate::Result<()>;
}

struct Envelope {
    name: EventName,
    value: String,
    done: Option<oneshot::Sender<()>>,
}

/// The process-wide event notifier, explicitly constructed at command
/// setup and passed by reference everywhere it is needed.
pub struct Notifier {
    stage: Stage,
    tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
}

impl Notifier {
    /// Creates the notifier and spawns its consumer task.
    #[must_use]
    pub fn new(stage: Stage, transport: Arc<dyn EventTransport>) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let name = envelope.name.as_str();
                tracing::info!(stage = stage.as_str(), name, value = %envelope.value, "Notify event");

                let delivery = tokio::time::timeout(
                    SEND_TIMEOUT,
                    transport.send(stage, name, &envelope.value),
                )
                .await;
                match delivery {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(name, "Notify event failed: {e}"),
                    Err(_) => tracing::warn!(name, "Notify event timed out"),
                }

                if let Some(done) = envelope.done {
                    let _ = done.send(());
                    return;
                }
            }
        });

        Arc::new(Self {
            stage,
            tx: Mutex::new(Some(tx)),
        })
    }

    /// Creates a notifier that drops everything; used by commands
    /// without an event pipe.
    #[must_use]
    pub fn disabled(stage: Stage) -> Arc<Self> {
        Arc::new(Self {
            stage,
            tx: Mutex::new(None),
        })
    }

    /// The stage this notifier reports for.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Enqueues an event without a value.
    pub fn notify(&self, name: EventName) {
        self.notify_value(name, "");
    }

    /// Enqueues an event with a value.
    pub fn notify_value(&self, name: EventName, value: impl Into<String>) {
        debug_assert!(!name.is_terminal(), "terminal events go through notify_terminal");

        let guard = self.tx.lock().expect("notifier lock poisoned");
        match guard.as_ref() {
            Some(tx) => {
                let _ = tx.send(Envelope {
                    name,
                    value: value.into(),
                    done: None,
                });
            }
            None => tracing::debug!(name = name.as_str(), "Notifier closed, dropping event"),
        }
    }

    /// Enqueues the stage's fatal-error event with the error text.
    pub fn notify_error(&self, error: &str) {
        self.notify_value(self.stage.error_event(), error);
    }

    /// Sends a terminal event, waits for it to be delivered, and
    /// closes the queue; subsequent sends are no-ops.
    pub async fn notify_terminal(&self, name: EventName) {
        let (done_tx, done_rx) = oneshot::channel();

        let sender = self.tx.lock().expect("notifier lock poisoned").take();
        let Some(tx) = sender else {
            return;
        };

        if tx
            .send(Envelope {
                name,
                value: String::new(),
                done: Some(done_tx),
            })
            .is_err()
        {
            return;
        }
        drop(tx);

        let _ = done_rx.await;
    }
}

/// Percent-encodes a query value (RFC 3986 unreserved set passes).
#[must_use]
pub fn query_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct Recorder {
        sent: AsyncMutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl EventTransport for Arc<Recorder> {
        async fn send(&self, stage: Stage, name: &str, value: &str) -> crate::Result<()> {
            self.sent.lock().await.push((
                stage.as_str().to_string(),
                name.to_string(),
                value.to_string(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let recorder = Arc::new(Recorder::default());
        let notifier = Notifier::new(Stage::Init, Arc::new(recorder.clone()));

        notifier.notify(EventName::NeedUpdateWSL);
        notifier.notify(EventName::UpdatingWSL);
        notifier.notify_value(EventName::WSLConfigMaybeIncompatible, "kernel");
        notifier.notify_terminal(EventName::InitExit).await;

        let sent = recorder.sent.lock().await;
        let names: Vec<&str> = sent.iter().map(|(_, n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            ["NeedUpdateWSL", "UpdatingWSL", "WSLConfigMaybeIncompatible", "InitExit"]
        );
        assert_eq!(sent[2].2, "kernel");
        assert!(sent.iter().all(|(s, _, _)| s == "init"));
    }

    #[tokio::test]
    async fn sends_after_terminal_are_noops() {
        let recorder = Arc::new(Recorder::default());
        let notifier = Notifier::new(Stage::Run, Arc::new(recorder.clone()));

        notifier.notify(EventName::Starting);
        notifier.notify_terminal(EventName::RunExit).await;
        notifier.notify(EventName::Ready);
        notifier.notify_terminal(EventName::RunExit).await;

        let sent = recorder.sent.lock().await;
        let names: Vec<&str> = sent.iter().map(|(_, n, _)| n.as_str()).collect();
        assert_eq!(names, ["Starting", "RunExit"]);
    }

    #[tokio::test]
    async fn disabled_notifier_drops_everything() {
        let notifier = Notifier::disabled(Stage::Run);
        notifier.notify(EventName::Starting);
        notifier.notify_terminal(EventName::RunExit).await;
    }

    #[test]
    fn terminal_set() {
        assert!(EventName::NeedReboot.is_terminal());
        assert!(EventName::InitExit.is_terminal());
        assert!(EventName::RunExit.is_terminal());
        assert!(!EventName::InitError.is_terminal());
    }

    #[test]
    fn query_escaping() {
        assert_eq!(query_escape("kernel,swap"), "kernel%2Cswap");
        assert_eq!(query_escape("plain-value_1.0~x"), "plain-value_1.0~x");
        assert_eq!(query_escape("a b\n"), "a%20b%0A");
    }
}
