//! Notification dispatcher.
//!
//! One request file goes through `Loaded → Resolved → Dispatching → Completed`:
//!
//! 1. **Loaded** — read and decode the file. A failure here ends the task with
//!    an error and leaves the file in place for inspection.
//! 2. **Resolved** — pick the transport from `Mode` and the retry limits from
//!    the covering policy (or the defaults).
//! 3. **Dispatching** — notify each service in list order, each one fully
//!    retried or exhausted before the next starts.
//! 4. **Completed** — remove the file (best effort) and fire the cleanup
//!    callback.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use datasync_core::{NotifyMode, PolicySet};

use crate::error::NotifyError;
use crate::registry::TaskId;
use crate::request::NotifyRequest;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::transport::{IpcTransport, Transports, UnitAction};

/// Result of notifying one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub service: String,
    pub outcome: RetryOutcome,
}

/// How a well-formed request ended. Every variant means the file was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Each service was attempted; some may have exhausted their retries.
    Notified {
        mode: NotifyMode,
        targets: Vec<TargetReport>,
    },
    /// The mode is known but this node has no transport configured for it.
    NotActionable { mode: NotifyMode },
    /// The mode is neither DBus nor Systemd.
    UnsupportedMode { mode: String },
}

impl DispatchOutcome {
    /// Services whose retries ran out.
    pub fn exhausted(&self) -> Vec<&str> {
        match self {
            DispatchOutcome::Notified { targets, .. } => targets
                .iter()
                .filter(|t| !t.outcome.is_success())
                .map(|t| t.service.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Stateless per-request notifier, shared by all dispatch tasks.
#[derive(Clone)]
pub struct NotifyDispatcher {
    transports: Transports,
    policies: Arc<PolicySet>,
    defaults: RetryPolicy,
}

impl NotifyDispatcher {
    pub fn new(transports: Transports, policies: Arc<PolicySet>, defaults: RetryPolicy) -> Self {
        Self {
            transports,
            policies,
            defaults,
        }
    }

    /// Policy snapshot this dispatcher resolves retry overrides from.
    pub fn policies(&self) -> &Arc<PolicySet> {
        &self.policies
    }

    /// Process one request file to completion.
    pub async fn dispatch(&self, request_path: &Path) -> Result<DispatchOutcome, NotifyError> {
        // Loaded
        let request = match NotifyRequest::load(request_path) {
            Ok(request) => request,
            Err(err) => {
                tracing::error!(
                    request = %request_path.display(),
                    error = %err,
                    "failed to read notify request; leaving file for inspection",
                );
                return Err(err);
            }
        };

        // Resolved
        let retry = self
            .policies
            .retry_for(&request.modified_data_path)
            .map(RetryPolicy::from)
            .unwrap_or(self.defaults);
        let info = &request.notify_info;
        tracing::info!(
            request = %request_path.display(),
            modified = %request.modified_data_path.display(),
            mode = %info.mode,
            services = info.services.len(),
            max_retries = retry.max_attempts,
            "dispatching sibling notification",
        );

        // Dispatching
        let outcome = match &info.mode {
            NotifyMode::Systemd => {
                let action = UnitAction::from_method(info.method.as_ref());
                DispatchOutcome::Notified {
                    mode: NotifyMode::Systemd,
                    targets: self.notify_systemd(&info.services, action, retry).await,
                }
            }
            NotifyMode::DBus => match &self.transports.ipc {
                Some(ipc) => DispatchOutcome::Notified {
                    mode: NotifyMode::DBus,
                    targets: notify_dbus(ipc, &info.services, retry).await,
                },
                None => {
                    tracing::warn!(
                        request = %request_path.display(),
                        services = ?info.services,
                        "no DBus notify method configured; request cannot be acted on",
                    );
                    DispatchOutcome::NotActionable {
                        mode: NotifyMode::DBus,
                    }
                }
            },
            NotifyMode::Unsupported(mode) => {
                tracing::error!(
                    request = %request_path.display(),
                    mode = %mode,
                    "notify failed due to unknown mode in request",
                );
                DispatchOutcome::UnsupportedMode { mode: mode.clone() }
            }
        };

        // Completed
        remove_request(request_path);
        let exhausted = outcome.exhausted();
        if exhausted.is_empty() {
            tracing::info!(request = %request_path.display(), "notify request completed");
        } else {
            tracing::warn!(
                request = %request_path.display(),
                exhausted = ?exhausted,
                "notify request completed with unreachable services",
            );
        }
        Ok(outcome)
    }

    async fn notify_systemd(
        &self,
        services: &[String],
        action: UnitAction,
        retry: RetryPolicy,
    ) -> Vec<TargetReport> {
        let manager = &self.transports.service_manager;
        let mut reports = Vec::with_capacity(services.len());

        // Later services may depend on earlier ones: strictly sequential.
        for service in services {
            let outcome = retry
                .run(service, |attempt| async move {
                    match manager.invoke_unit_action(service, action).await {
                        Ok(true) => true,
                        Ok(false) => {
                            tracing::warn!(
                                %service,
                                %action,
                                attempt,
                                "service manager reported failure",
                            );
                            false
                        }
                        Err(err) => {
                            tracing::warn!(
                                %service,
                                %action,
                                attempt,
                                error = %err,
                                "service manager call failed",
                            );
                            false
                        }
                    }
                })
                .await;
            reports.push(TargetReport {
                service: service.clone(),
                outcome,
            });
        }
        reports
    }
}

async fn notify_dbus(
    ipc: &IpcTransport,
    services: &[String],
    retry: RetryPolicy,
) -> Vec<TargetReport> {
    let mut reports = Vec::with_capacity(services.len());

    for service in services {
        let outcome = retry
            .run(service, |attempt| async move {
                let endpoint = match ipc
                    .discovery
                    .resolve_endpoint(service, &ipc.method.interface)
                    .await
                {
                    Ok(endpoint) => endpoint,
                    Err(err) => {
                        tracing::warn!(%service, attempt, error = %err, "endpoint lookup failed");
                        return false;
                    }
                };
                match ipc.notifier.invoke(&endpoint, &ipc.method).await {
                    Ok(ok) => ok,
                    Err(err) => {
                        tracing::warn!(
                            %service,
                            object_path = %endpoint.object_path,
                            attempt,
                            error = %err,
                            "IPC notify call failed",
                        );
                        false
                    }
                }
            })
            .await;
        reports.push(TargetReport {
            service: service.clone(),
            outcome,
        });
    }
    reports
}

/// Best-effort removal of a finished request. Returns whether a file was removed.
///
/// An already-missing file is a no-op; any other failure is logged only.
pub fn remove_request(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!(request = %path.display(), "notify request already removed");
            false
        }
        Err(err) => {
            tracing::error!(
                request = %path.display(),
                error = %err,
                "failed to remove notify request",
            );
            false
        }
    }
}

/// Called exactly once when a dispatch task reaches its terminal state.
pub type CleanupCallback = Box<dyn FnOnce(TaskId) + Send>;

/// One request bound to one task identity.
pub struct DispatchTask {
    id: TaskId,
    request_path: PathBuf,
    dispatcher: Arc<NotifyDispatcher>,
    cleanup: Option<CleanupCallback>,
}

impl DispatchTask {
    pub fn new(id: TaskId, request_path: PathBuf, dispatcher: Arc<NotifyDispatcher>) -> Self {
        Self {
            id,
            request_path,
            dispatcher,
            cleanup: None,
        }
    }

    pub fn on_complete(mut self, cleanup: CleanupCallback) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Run the dispatch.
    ///
    /// The cleanup callback fires once whether the dispatch returns, panics,
    /// or the future is dropped before completion.
    pub async fn run(self) -> Result<DispatchOutcome, NotifyError> {
        let DispatchTask {
            id,
            request_path,
            dispatcher,
            cleanup,
        } = self;
        let _guard = CleanupGuard { id, cleanup };
        dispatcher.dispatch(&request_path).await
    }
}

struct CleanupGuard {
    id: TaskId,
    cleanup: Option<CleanupCallback>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            if std::thread::panicking() {
                tracing::error!(task = %self.id, "dispatch task panicked");
            }
            cleanup(self.id);
        }
    }
}
