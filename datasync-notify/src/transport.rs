//! Capabilities the dispatcher consumes: the service manager and the IPC bus.
//!
//! Implementations live outside this crate (the daemon ships command-line
//! backed ones); tests plug in scripted doubles.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use datasync_core::NotifyMethod;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Service-manager action for Systemd mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitAction {
    Reload,
    Restart,
}

impl UnitAction {
    /// `Reload` maps to a reload; anything else, including no method, restarts.
    pub fn from_method(method: Option<&NotifyMethod>) -> Self {
        match method {
            Some(NotifyMethod::Reload) => UnitAction::Reload,
            _ => UnitAction::Restart,
        }
    }
}

impl fmt::Display for UnitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitAction::Reload => write!(f, "ReloadUnit"),
            UnitAction::Restart => write!(f, "RestartUnit"),
        }
    }
}

/// Where a service exposes the notify interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub service: String,
    pub object_path: String,
}

/// The interface/method pair invoked on DBus-mode targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcMethod {
    pub interface: String,
    pub method: String,
}

#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Returns `Ok(false)` when the manager ran but refused or failed the job.
    async fn invoke_unit_action(
        &self,
        unit: &str,
        action: UnitAction,
    ) -> Result<bool, TransportError>;
}

#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Fails with [`TransportError::NotFound`] when nothing matches.
    async fn resolve_endpoint(
        &self,
        service: &str,
        interface: &str,
    ) -> Result<Endpoint, TransportError>;
}

#[async_trait]
pub trait IpcNotifier: Send + Sync {
    async fn invoke(&self, endpoint: &Endpoint, method: &IpcMethod)
        -> Result<bool, TransportError>;
}

/// Everything needed for DBus mode. Absent when no notify method is configured.
#[derive(Clone)]
pub struct IpcTransport {
    pub discovery: Arc<dyn ServiceDiscovery>,
    pub notifier: Arc<dyn IpcNotifier>,
    pub method: IpcMethod,
}

/// The transports handed to every dispatcher.
#[derive(Clone)]
pub struct Transports {
    pub service_manager: Arc<dyn ServiceManager>,
    pub ipc: Option<IpcTransport>,
}

impl Transports {
    pub fn new(service_manager: Arc<dyn ServiceManager>) -> Self {
        Self {
            service_manager,
            ipc: None,
        }
    }

    pub fn with_ipc(mut self, ipc: IpcTransport) -> Self {
        self.ipc = Some(ipc);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_reload_maps_to_reload() {
        assert_eq!(
            UnitAction::from_method(Some(&NotifyMethod::Reload)),
            UnitAction::Reload
        );
        assert_eq!(
            UnitAction::from_method(Some(&NotifyMethod::Restart)),
            UnitAction::Restart
        );
        assert_eq!(
            UnitAction::from_method(Some(&NotifyMethod::Other("Kick".into()))),
            UnitAction::Restart
        );
        assert_eq!(UnitAction::from_method(None), UnitAction::Restart);
    }
}
