//! IPC plane: the named-pipe RESTful control server the front-end
//! drives, and the named-pipe HTTP transport the event notifier sends
//! through.

pub mod error;
pub mod init_routes;
pub mod notify_transport;
pub mod run_routes;
pub mod server;

pub use error::{IpcError, Result};
pub use notify_transport::PipeEventTransport;
pub use server::{StopLatch, serve};
