//! # datasync-notify
//!
//! Cross-node sibling notification: a node records "this path changed" as a
//! durable request file, and the sibling's dispatcher notifies the configured
//! services with bounded, fixed-interval retry.
//!
//! - [`producer`] writes requests ([`NotifyProducer`])
//! - [`dispatcher`] consumes one request per task ([`NotifyDispatcher`])
//! - [`retry`] drives a single target ([`RetryPolicy`])
//! - [`registry`] tracks in-flight dispatch tasks ([`TaskRegistry`])
//! - [`transport`] is the seam to the service manager and the IPC bus

pub mod dispatcher;
pub mod error;
pub mod producer;
pub mod registry;
pub mod request;
pub mod retry;
pub mod transport;

pub use dispatcher::{
    remove_request, CleanupCallback, DispatchOutcome, DispatchTask, NotifyDispatcher,
    TargetReport,
};
pub use error::{NotifyError, TransportError};
pub use producer::NotifyProducer;
pub use registry::{TaskId, TaskInfo, TaskRegistry};
pub use request::NotifyRequest;
pub use retry::{RetryOutcome, RetryPolicy, RetryState};
pub use transport::{
    Endpoint, IpcMethod, IpcNotifier, IpcTransport, ServiceDiscovery, ServiceManager,
    Transports, UnitAction,
};
