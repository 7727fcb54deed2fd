//! Policy-file loading.
//!
//! # File layout
//!
//! ```text
//! <config_dir>/
//!   <anything>.json     { "Files": [ {..}, .. ], "Directories": [ {..}, .. ] }
//! ```
//!
//! Each file is all-or-nothing: one bad record rejects the whole file, and a
//! rejected file never stops the remaining files from loading.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::duration::parse_iso8601;
use crate::error::{invalid, io_err, ConfigError};
use crate::types::{
    NotifyInfo, NotifyMethod, NotifyMode, RetryOverride, SyncDirection, SyncPolicyRecord,
    SyncType,
};

// ---------------------------------------------------------------------------
// 1. Raw (on-disk) shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(rename = "Files", default)]
    files: Vec<RawPolicy>,
    #[serde(rename = "Directories", default)]
    directories: Vec<RawPolicy>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
enum RawSyncType {
    Immediate,
    Periodic,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPolicy {
    path: String,
    description: Option<String>,
    sync_direction: SyncDirection,
    sync_type: RawSyncType,
    periodicity: Option<String>,
    retry_attempts: Option<u8>,
    retry_interval: Option<String>,
    exclude_files_list: Option<Vec<String>>,
    include_files_list: Option<Vec<String>>,
    notify_sibling: Option<NotifyInfo>,
}

impl TryFrom<RawPolicy> for SyncPolicyRecord {
    type Error = ConfigError;

    fn try_from(raw: RawPolicy) -> Result<Self, Self::Error> {
        if raw.path.is_empty() {
            return Err(invalid("<empty>", "Path must not be empty"));
        }
        let path = PathBuf::from(&raw.path);
        if !path.is_absolute() {
            return Err(invalid(&raw.path, "Path must be absolute"));
        }

        let sync_type = match raw.sync_type {
            RawSyncType::Immediate => SyncType::Immediate,
            RawSyncType::Periodic => {
                let value = raw
                    .periodicity
                    .as_deref()
                    .ok_or_else(|| invalid(&raw.path, "Periodic sync requires Periodicity"))?;
                let periodicity = parse_iso8601(value)?;
                if periodicity.is_zero() {
                    return Err(invalid(&raw.path, "Periodicity must be greater than zero"));
                }
                SyncType::Periodic { periodicity }
            }
        };

        let retry = match (raw.retry_attempts, raw.retry_interval.as_deref()) {
            (Some(attempts), Some(interval)) => Some(RetryOverride {
                attempts,
                interval: parse_iso8601(interval)?,
            }),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    path = %raw.path,
                    "RetryAttempts and RetryInterval must be given together; ignoring retry override",
                );
                None
            }
        };

        if let Some(notify) = &raw.notify_sibling {
            validate_notify(&raw.path, notify)?;
        }

        Ok(SyncPolicyRecord {
            path,
            description: raw.description,
            sync_direction: raw.sync_direction,
            sync_type,
            retry,
            exclude_files: raw.exclude_files_list,
            include_files: raw.include_files_list,
            notify_sibling: raw.notify_sibling,
        })
    }
}

fn validate_notify(policy: &str, notify: &NotifyInfo) -> Result<(), ConfigError> {
    if notify.services.is_empty() {
        return Err(invalid(policy, "NotifySibling.NotifyServices must not be empty"));
    }
    if let Some(service) = notify.services.iter().find(|s| s.trim().is_empty()) {
        return Err(invalid(
            policy,
            format!("NotifySibling.NotifyServices has a blank entry '{service}'"),
        ));
    }
    match (&notify.mode, &notify.method) {
        (NotifyMode::Unsupported(mode), _) => Err(invalid(
            policy,
            format!("unsupported NotifySibling.Mode '{mode}'"),
        )),
        (NotifyMode::Systemd, Some(NotifyMethod::Other(method))) => Err(invalid(
            policy,
            format!("unsupported NotifySibling.Method '{method}'"),
        )),
        (NotifyMode::DBus, Some(method)) => {
            tracing::warn!(policy, %method, "Method is only meaningful for Systemd mode; ignoring");
            Ok(())
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// 2. Policy set
// ---------------------------------------------------------------------------

/// The ordered, path-unique collection of policies loaded at startup or reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    records: Vec<SyncPolicyRecord>,
}

impl PolicySet {
    /// Build a set, rejecting duplicate paths.
    pub fn new(records: Vec<SyncPolicyRecord>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for record in &records {
            if !seen.insert(record.path.clone()) {
                return Err(ConfigError::DuplicatePath {
                    path: record.path.clone(),
                });
            }
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncPolicyRecord> {
        self.records.iter()
    }

    pub fn get(&self, path: &Path) -> Option<&SyncPolicyRecord> {
        self.records.iter().find(|r| r.path == path)
    }

    /// The deepest policy whose path is `path` or one of its ancestors.
    pub fn covering(&self, path: &Path) -> Option<&SyncPolicyRecord> {
        self.records
            .iter()
            .filter(|r| r.covers(path))
            .max_by_key(|r| r.path.components().count())
    }

    /// Retry override that applies to a change at `path`, if any.
    pub fn retry_for(&self, path: &Path) -> Option<RetryOverride> {
        self.covering(path).and_then(|r| r.retry)
    }
}

impl IntoIterator for PolicySet {
    type Item = SyncPolicyRecord;
    type IntoIter = std::vec::IntoIter<SyncPolicyRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// A policy file that was rejected during [`load_policy_dir`].
#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub error: ConfigError,
}

/// Result of loading a configuration directory.
#[derive(Debug, Default)]
pub struct PolicyLoad {
    pub policies: PolicySet,
    pub skipped: Vec<SkippedFile>,
}

/// Parse every record of one policy file. `Files` come before `Directories`.
pub fn load_policy_file(path: &Path) -> Result<Vec<SyncPolicyRecord>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let file: PolicyFile = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if file.files.is_empty() && file.directories.is_empty() {
        tracing::warn!(path = %path.display(), "policy file lists no Files or Directories");
    }

    file.files
        .into_iter()
        .chain(file.directories)
        .map(SyncPolicyRecord::try_from)
        .collect()
}

/// Load every `*.json` file in `dir`, in file-name order.
///
/// A file that fails to read, parse, or validate (including one that repeats
/// a path already loaded) is logged, reported in [`PolicyLoad::skipped`], and
/// contributes no records. A missing directory yields an empty set.
pub fn load_policy_dir(dir: &Path) -> Result<PolicyLoad, ConfigError> {
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "policy directory not found; no paths will be synced");
        return Ok(PolicyLoad::default());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut records: Vec<SyncPolicyRecord> = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut skipped = Vec::new();

    for file in files {
        let parsed = load_policy_file(&file).and_then(|batch| {
            let mut in_file = HashSet::new();
            for record in &batch {
                if seen.contains(&record.path) || !in_file.insert(record.path.clone()) {
                    return Err(ConfigError::DuplicatePath {
                        path: record.path.clone(),
                    });
                }
            }
            Ok(batch)
        });

        match parsed {
            Ok(batch) => {
                tracing::debug!(file = %file.display(), count = batch.len(), "loaded policy file");
                seen.extend(batch.iter().map(|r| r.path.clone()));
                records.extend(batch);
            }
            Err(error) => {
                tracing::error!(file = %file.display(), %error, "skipping policy file");
                skipped.push(SkippedFile { path: file, error });
            }
        }
    }

    Ok(PolicyLoad {
        policies: PolicySet::new(records)?,
        skipped,
    })
}
