//! Core types for the ovm controller.
//!
//! The orchestrator state machines, the REST control server and the
//! WSL adapter all meet here: per-command options, the capability
//! flags REST handlers are gated on, the one-shot [`gate::Gate`]
//! channels front-end actions complete, the [`event::Notifier`] that
//! streams stage events to the GUI, and the on-disk
//! [`manifest::Versions`] reconciliation model.

pub mod caps;
pub mod disk;
pub mod error;
pub mod event;
pub mod gate;
pub mod logging;
pub mod manifest;
pub mod net;
pub mod opts;
pub mod path;
pub mod watchdog;

pub use caps::Capabilities;
pub use error::{CoreError, Result};
pub use event::{EventName, Notifier, Stage};
pub use gate::{Gate, GateBus, WslConfigFix};
pub use manifest::Versions;
pub use opts::{BasicOpts, MigrateOpts, RunOpts};
