//! Registry of in-flight dispatch tasks.
//!
//! Each arriving request gets its own task immediately; there is no
//! concurrency limit. A request file is claimed by at most one live task.
//! Tasks register on spawn and deregister through their cleanup callback.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::dispatcher::{DispatchOutcome, DispatchTask, NotifyDispatcher};
use crate::error::NotifyError;

/// Identity of one dispatch task, independent of the request it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dispatch-{}", self.0)
    }
}

/// Snapshot of one live task, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub request_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TaskId, TaskInfo>>,
    idle: Notify,
}

/// Cheap to clone; all clones share the same set of tasks.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

pub type DispatchHandle = JoinHandle<Result<DispatchOutcome, NotifyError>>;

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TaskInfo>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a task for `request_path` unless a live task already owns it.
    pub fn register(&self, request_path: &Path) -> Option<TaskId> {
        let mut tasks = self.tasks();
        if tasks.values().any(|t| t.request_path == request_path) {
            return None;
        }
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        tasks.insert(
            id,
            TaskInfo {
                id,
                request_path: request_path.to_path_buf(),
                started_at: Utc::now(),
            },
        );
        Some(id)
    }

    /// Deregister a finished task. Returns `false` for an unknown id.
    pub fn complete(&self, id: TaskId) -> bool {
        let (removed, now_idle) = {
            let mut tasks = self.tasks();
            let removed = tasks.remove(&id).is_some();
            (removed, tasks.is_empty())
        };
        if removed {
            tracing::debug!(task = %id, "dispatch task deregistered");
        } else {
            tracing::warn!(task = %id, "completion for unknown dispatch task");
        }
        if now_idle {
            self.inner.idle.notify_waiters();
        }
        removed
    }

    /// Claim `request_path` and run its dispatch on a new task.
    ///
    /// Returns `None` when another live task already owns the file.
    pub fn spawn(
        &self,
        dispatcher: Arc<NotifyDispatcher>,
        request_path: PathBuf,
    ) -> Option<(TaskId, DispatchHandle)> {
        let id = self.register(&request_path)?;
        let registry = self.clone();
        let task = DispatchTask::new(id, request_path.clone(), dispatcher).on_complete(Box::new(
            move |id| {
                registry.complete(id);
            },
        ));
        tracing::debug!(task = %id, request = %request_path.display(), "dispatch task spawned");
        Some((id, tokio::spawn(task.run())))
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    pub fn is_claimed(&self, request_path: &Path) -> bool {
        self.tasks().values().any(|t| t.request_path == request_path)
    }

    /// Live tasks ordered by id.
    pub fn snapshot(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self.tasks().values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Resolve once no task is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Wait up to `timeout` for outstanding tasks; on timeout return the stragglers.
    pub async fn drain(&self, timeout: Duration) -> Result<(), Vec<TaskInfo>> {
        match tokio::time::timeout(timeout, self.wait_idle()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.snapshot()),
        }
    }
}
