//! Daemon configuration, injected at startup.
//!
//! Read from a JSON file; every key is optional and falls back to the
//! defaults below. A missing file means "all defaults".

use std::path::{Path, PathBuf};
use std::time::Duration;

use datasync_notify::{IpcMethod, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, DaemonError};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/datasync/daemon.json";
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Directory of sync policy files.
    pub config_dir: PathBuf,
    /// Where this node writes requests for its sibling.
    pub outgoing_dir: PathBuf,
    /// Where requests from the sibling arrive.
    pub incoming_dir: PathBuf,
    pub socket_path: PathBuf,
    pub retry_attempts: u8,
    pub retry_interval_secs: u64,
    pub drain_timeout_secs: u64,
    /// Interface/method invoked for DBus-mode requests; `None` disables DBus mode.
    pub dbus_notify: Option<IpcMethod>,
    /// Produce requests when configured Immediate paths change.
    pub watch_policies: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/datasync/config.d"),
            outgoing_dir: PathBuf::from("/var/lib/datasync/notify/outgoing"),
            incoming_dir: PathBuf::from("/var/lib/datasync/notify/incoming"),
            socket_path: PathBuf::from("/run/datasync/datasync.sock"),
            retry_attempts: 3,
            retry_interval_secs: 5,
            drain_timeout_secs: 60,
            dbus_notify: None,
            watch_policies: true,
        }
    }
}

impl DaemonConfig {
    /// Load `path`, or the defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "daemon config not found; using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(io_err(path, err)),
        };
        serde_json::from_str(&contents).map_err(|source| DaemonError::DaemonConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Retry limits used when no policy overrides them.
    pub fn retry_defaults(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_secs(self.retry_interval_secs),
        )
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Create the request directories and the socket's parent.
    pub fn ensure_dirs(&self) -> Result<(), DaemonError> {
        let socket_dir = self.socket_path.parent().map(Path::to_path_buf);
        for dir in [Some(self.outgoing_dir.clone()), Some(self.incoming_dir.clone()), socket_dir]
            .into_iter()
            .flatten()
        {
            if !dir.exists() {
                std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            }
        }
        Ok(())
    }
}
