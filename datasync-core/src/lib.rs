//! datasync core library: sync policy records and policy-file parsing.
//!
//! - [`types`] — policy records and the sibling-notification policy
//! - [`config`] — loading policy files from a configuration directory
//! - [`duration`] — ISO-8601 durations as used by `Periodicity` / `RetryInterval`
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{load_policy_dir, load_policy_file, PolicyLoad, PolicySet, SkippedFile};
pub use error::ConfigError;
pub use types::{
    NotifyInfo, NotifyMethod, NotifyMode, RetryOverride, SyncDirection, SyncPolicyRecord,
    SyncType,
};
