use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, its configuration and the control protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("policy configuration error: {0}")]
    Config(#[from] datasync_core::ConfigError),

    #[error("notify request error: {0}")]
    Request(#[from] datasync_notify::NotifyError),

    #[error("failed to parse daemon config {path}: {source}")]
    DaemonConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
