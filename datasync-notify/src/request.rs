//! The notify request wire format.
//!
//! ```json
//! {
//!   "ModifiedDataPath": "/etc/foo.conf",
//!   "NotifyInfo": { "Mode": "Systemd", "NotifyServices": ["foo.service"], "Method": "Reload" }
//! }
//! ```

use std::path::{Path, PathBuf};

use datasync_core::NotifyInfo;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, NotifyError};

/// One pending sibling notification, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyRequest {
    #[serde(rename = "ModifiedDataPath")]
    pub modified_data_path: PathBuf,
    #[serde(rename = "NotifyInfo")]
    pub notify_info: NotifyInfo,
}

impl NotifyRequest {
    pub fn new(modified_data_path: impl Into<PathBuf>, notify_info: NotifyInfo) -> Self {
        Self {
            modified_data_path: modified_data_path.into(),
            notify_info,
        }
    }

    /// Read and decode a request file.
    ///
    /// Missing fields, malformed JSON and unreadable files are errors; an
    /// unrecognized `Mode` is not (see [`datasync_core::NotifyMode`]).
    pub fn load(path: &Path) -> Result<Self, NotifyError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        serde_json::from_str(&contents).map_err(|source| NotifyError::Request {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_json_pretty(&self) -> Result<String, NotifyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
