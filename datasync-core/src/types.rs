//! Domain types for sync policies.
//!
//! A [`SyncPolicyRecord`] is built once from a policy file and never mutated.
//! [`NotifyInfo`] is shared with the notify request wire format, so its serde
//! names follow the on-disk JSON (`Mode`, `NotifyServices`, `Method`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which node is the source of truth for a synchronized path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    Active2Passive,
    Passive2Active,
    Bidirectional,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::Active2Passive => write!(f, "Active2Passive"),
            SyncDirection::Passive2Active => write!(f, "Passive2Active"),
            SyncDirection::Bidirectional => write!(f, "Bidirectional"),
        }
    }
}

/// When a path is synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    Immediate,
    /// Synchronized on a timer; the period is always non-zero.
    Periodic { periodicity: Duration },
}

/// Notification transport chosen per policy.
///
/// Requests arriving from a sibling may carry a mode this node does not know;
/// those decode as [`NotifyMode::Unsupported`] instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotifyMode {
    DBus,
    Systemd,
    Unsupported(String),
}

impl From<String> for NotifyMode {
    fn from(s: String) -> Self {
        match s.as_str() {
            "DBus" => NotifyMode::DBus,
            "Systemd" => NotifyMode::Systemd,
            _ => NotifyMode::Unsupported(s),
        }
    }
}

impl From<NotifyMode> for String {
    fn from(mode: NotifyMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for NotifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyMode::DBus => write!(f, "DBus"),
            NotifyMode::Systemd => write!(f, "Systemd"),
            NotifyMode::Unsupported(other) => f.write_str(other),
        }
    }
}

/// Service-manager action requested for Systemd mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotifyMethod {
    Reload,
    Restart,
    Other(String),
}

impl From<String> for NotifyMethod {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Reload" => NotifyMethod::Reload,
            "Restart" => NotifyMethod::Restart,
            _ => NotifyMethod::Other(s),
        }
    }
}

impl From<NotifyMethod> for String {
    fn from(method: NotifyMethod) -> Self {
        method.to_string()
    }
}

impl fmt::Display for NotifyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyMethod::Reload => write!(f, "Reload"),
            NotifyMethod::Restart => write!(f, "Restart"),
            NotifyMethod::Other(other) => f.write_str(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// How (and whom) to notify on the sibling node once a path changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyInfo {
    #[serde(rename = "Mode")]
    pub mode: NotifyMode,
    /// Notified strictly in this order.
    #[serde(rename = "NotifyServices")]
    pub services: Vec<String>,
    #[serde(rename = "Method", default, skip_serializing_if = "Option::is_none")]
    pub method: Option<NotifyMethod>,
}

/// Per-policy override of the dispatcher's retry defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOverride {
    pub attempts: u8,
    pub interval: Duration,
}

/// One synchronized file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicyRecord {
    /// Absolute path; unique within a configuration set.
    pub path: PathBuf,
    pub description: Option<String>,
    pub sync_direction: SyncDirection,
    pub sync_type: SyncType,
    pub retry: Option<RetryOverride>,
    pub exclude_files: Option<Vec<String>>,
    pub include_files: Option<Vec<String>>,
    pub notify_sibling: Option<NotifyInfo>,
}

impl SyncPolicyRecord {
    /// True when `path` is this policy's path or lies underneath it.
    pub fn covers(&self, path: &Path) -> bool {
        path.starts_with(&self.path)
    }

    /// Whether a change at `path` should be acted on, honouring the
    /// exclude/include lists: an excluded prefix wins unless an include
    /// entry also covers the path.
    pub fn is_tracked(&self, path: &Path) -> bool {
        if !self.covers(path) {
            return false;
        }
        let matches = |list: &Option<Vec<String>>| {
            list.as_deref()
                .unwrap_or_default()
                .iter()
                .any(|entry| path.starts_with(entry))
        };
        !matches(&self.exclude_files) || matches(&self.include_files)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
