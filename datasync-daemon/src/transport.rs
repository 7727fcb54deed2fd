//! Command-line backed transports: `systemctl` for unit actions, `busctl`
//! for endpoint discovery and IPC calls.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use datasync_notify::{
    Endpoint, IpcMethod, IpcNotifier, ServiceDiscovery, ServiceManager, TransportError,
    UnitAction,
};
use serde_json::Value;
use tokio::process::Command;

async fn run_command<I, S>(program: &OsStr, args: I) -> Result<Output, TransportError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<S> = args.into_iter().collect();
    let command = std::iter::once(program.to_string_lossy().into_owned())
        .chain(args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()))
        .collect::<Vec<_>>()
        .join(" ");

    Command::new(program)
        .args(&args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| TransportError::Command {
            command,
            detail: err.to_string(),
        })
}

fn stderr_line(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

// ---------------------------------------------------------------------------
// systemctl
// ---------------------------------------------------------------------------

/// Reloads or restarts units through `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemctlServiceManager {
    program: PathBuf,
}

impl Default for SystemctlServiceManager {
    fn default() -> Self {
        Self::with_program("systemctl")
    }
}

impl SystemctlServiceManager {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ServiceManager for SystemctlServiceManager {
    async fn invoke_unit_action(
        &self,
        unit: &str,
        action: UnitAction,
    ) -> Result<bool, TransportError> {
        let verb = match action {
            UnitAction::Reload => "reload",
            UnitAction::Restart => "restart",
        };
        let output = run_command(self.program.as_os_str(), [verb, unit]).await?;
        if output.status.success() {
            tracing::info!(unit, %action, "unit action succeeded");
            Ok(true)
        } else {
            tracing::warn!(
                unit,
                %action,
                status = %output.status,
                stderr = %stderr_line(&output),
                "unit action failed",
            );
            Ok(false)
        }
    }
}

// ---------------------------------------------------------------------------
// busctl
// ---------------------------------------------------------------------------

/// Coordinates of the object mapper queried for endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMapper {
    pub service: String,
    pub object_path: String,
    pub interface: String,
}

impl Default for ObjectMapper {
    fn default() -> Self {
        Self {
            service: "xyz.openbmc_project.ObjectMapper".to_string(),
            object_path: "/xyz/openbmc_project/object_mapper".to_string(),
            interface: "xyz.openbmc_project.ObjectMapper".to_string(),
        }
    }
}

/// Resolves endpoints with the mapper's `GetSubTree` and calls methods with `busctl call`.
#[derive(Debug, Clone)]
pub struct BusctlIpc {
    program: PathBuf,
    mapper: ObjectMapper,
}

impl Default for BusctlIpc {
    fn default() -> Self {
        Self {
            program: PathBuf::from("busctl"),
            mapper: ObjectMapper::default(),
        }
    }
}

impl BusctlIpc {
    pub fn with_mapper(mut self, mapper: ObjectMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

/// Pick the first object path (in path order) hosted by `service` from a
/// `busctl --json=short` reply to `GetSubTree`.
fn object_path_for(reply: &Value, service: &str) -> Option<String> {
    let subtree = reply.get("data")?.get(0)?.as_object()?;
    let mut paths: Vec<&String> = subtree
        .iter()
        .filter(|(_, services)| services.get(service).is_some())
        .map(|(path, _)| path)
        .collect();
    paths.sort();
    paths.first().map(|p| p.to_string())
}

#[async_trait]
impl ServiceDiscovery for BusctlIpc {
    async fn resolve_endpoint(
        &self,
        service: &str,
        interface: &str,
    ) -> Result<Endpoint, TransportError> {
        let output = run_command(
            self.program.as_os_str(),
            [
                "--json=short",
                "call",
                &self.mapper.service,
                &self.mapper.object_path,
                &self.mapper.interface,
                "GetSubTree",
                "sias",
                "/",
                "0",
                "1",
                interface,
            ],
        )
        .await?;
        if !output.status.success() {
            return Err(TransportError::Command {
                command: "busctl call GetSubTree".to_string(),
                detail: stderr_line(&output),
            });
        }

        let reply: Value = serde_json::from_slice(&output.stdout)
            .map_err(|err| TransportError::Protocol(format!("GetSubTree reply: {err}")))?;
        let object_path =
            object_path_for(&reply, service).ok_or_else(|| TransportError::NotFound {
                service: service.to_string(),
                interface: interface.to_string(),
            })?;
        Ok(Endpoint {
            service: service.to_string(),
            object_path,
        })
    }
}

#[async_trait]
impl IpcNotifier for BusctlIpc {
    async fn invoke(
        &self,
        endpoint: &Endpoint,
        method: &IpcMethod,
    ) -> Result<bool, TransportError> {
        let output = run_command(
            self.program.as_os_str(),
            [
                "call",
                &endpoint.service,
                &endpoint.object_path,
                &method.interface,
                &method.method,
            ],
        )
        .await?;
        if !output.status.success() {
            tracing::warn!(
                service = %endpoint.service,
                object_path = %endpoint.object_path,
                method = %method.method,
                stderr = %stderr_line(&output),
                "IPC notify call failed",
            );
        }
        Ok(output.status.success())
    }
}
