//! Adapter over `wsl.exe` and the WSL environment.
//!
//! Everything the controller needs from WSL goes through here: the
//! executable discovery probe, the single command contract (UTF-8
//! output, hidden window, captured streams, synthetic error text),
//! substring classification of the CLI's unstructured failures, the
//! distro lifecycle operations, the environment gates `init` walks
//! through, `.wslconfig` repair, feature installation, the MSI runtime
//! update, and the guest launch loop.

pub mod check;
pub mod classify;
pub mod config;
pub mod distro;
pub mod error;
pub mod exec;
pub mod find;
pub mod install;
pub mod invoke;
pub mod launch;
pub mod update;

pub use error::{Result, WslError};
