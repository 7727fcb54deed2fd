//! Request producer.
//!
//! ## `produce` — write protocol
//!
//! 1. Frame the request from the policy's `NotifySibling` and the changed path.
//! 2. Pick a unique name: `notify_<utc timestamp>_<uuid>.json`.
//! 3. Write to `<name>.json.tmp` in the outgoing directory.
//! 4. Rename to `<name>.json` (atomic on POSIX), so readers never see a partial file.
//!
//! Production is never retried here; the caller decides.

use std::path::{Path, PathBuf};

use chrono::Utc;
use datasync_core::SyncPolicyRecord;
use uuid::Uuid;

use crate::error::{io_err, NotifyError};
use crate::request::NotifyRequest;

/// Writes notify requests into the outgoing directory.
#[derive(Debug, Clone)]
pub struct NotifyProducer {
    outgoing_dir: PathBuf,
}

impl NotifyProducer {
    pub fn new(outgoing_dir: impl Into<PathBuf>) -> Self {
        Self {
            outgoing_dir: outgoing_dir.into(),
        }
    }

    pub fn outgoing_dir(&self) -> &Path {
        &self.outgoing_dir
    }

    /// Persist a request for `changed_path` under `policy` and return its path.
    pub fn produce(
        &self,
        policy: &SyncPolicyRecord,
        changed_path: &Path,
    ) -> Result<PathBuf, NotifyError> {
        let notify_info = policy
            .notify_sibling
            .clone()
            .ok_or_else(|| NotifyError::NoSiblingPolicy {
                path: policy.path.clone(),
            })?;
        if !policy.covers(changed_path) {
            tracing::warn!(
                policy = %policy.path.display(),
                changed = %changed_path.display(),
                "changed path is outside the policy path",
            );
        }

        let request = NotifyRequest::new(changed_path, notify_info);
        let payload = request.to_json_pretty()?;

        std::fs::create_dir_all(&self.outgoing_dir).map_err(|e| io_err(&self.outgoing_dir, e))?;

        let name = format!(
            "notify_{}_{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%6fZ"),
            Uuid::new_v4().simple()
        );
        let path = self.outgoing_dir.join(&name);
        let tmp = self.outgoing_dir.join(format!("{name}.tmp"));

        std::fs::write(&tmp, payload).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }

        tracing::info!(
            request = %path.display(),
            changed = %changed_path.display(),
            "sibling notification request written",
        );
        Ok(path)
    }
}
