//! datasync daemon runtime: request watcher + change watcher + control socket.

pub mod config;
mod error;
pub mod protocol;
mod runtime;
pub mod transport;

pub use config::DaemonConfig;
pub use error::DaemonError;
pub use protocol::{
    ControlClient, ControlRequest, ControlResponse, DaemonStatus, ReloadSummary, SkippedPolicyFile,
};
pub use runtime::{build_transports, dispatch_once, init_tracing, run, start_blocking};
pub use transport::{BusctlIpc, SystemctlServiceManager};
