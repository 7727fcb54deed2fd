//! Error types for datasync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading sync policies.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, with the path that was being read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The policy file is not valid JSON or does not match the expected shape.
    #[error("failed to parse policy file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A duration string did not match `P[nD][T[nH][nM][nS]]`.
    #[error("'{value}' is not an ISO 8601 duration (expected P[nD][T[nH][nM][nS]])")]
    InvalidDuration { value: String },

    /// A record parsed but violates a policy invariant.
    #[error("invalid policy for '{policy}': {reason}")]
    InvalidPolicy { policy: String, reason: String },

    /// Two records in the configuration set name the same path.
    #[error("duplicate policy path {path}")]
    DuplicatePath { path: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn invalid(policy: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidPolicy {
        policy: policy.into(),
        reason: reason.into(),
    }
}
