//! Error types for datasync-notify.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by producing or loading notify requests.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The request file exists but could not be interpreted.
    #[error("malformed notify request {path}: {source}")]
    Request {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error while framing a request.
    #[error("notify request JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The policy has no `NotifySibling` section, so there is nothing to send.
    #[error("policy {path} does not configure sibling notification")]
    NoSiblingPolicy { path: PathBuf },
}

/// Failure reported by a service-manager or IPC capability.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No endpoint implements the requested interface for the service.
    #[error("no endpoint of {service} implements {interface}")]
    NotFound { service: String, interface: String },

    /// The transport command could not be run or exited abnormally.
    #[error("{command} failed: {detail}")]
    Command { command: String, detail: String },

    /// The transport answered with something that could not be decoded.
    #[error("transport protocol error: {0}")]
    Protocol(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> NotifyError {
    NotifyError::Io {
        path: path.into(),
        source,
    }
}
