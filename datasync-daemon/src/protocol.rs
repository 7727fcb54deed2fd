//! Control channel between the CLI and a running daemon.
//!
//! One JSON object per line in each direction over the daemon's Unix socket.
//! Requests are tagged by `cmd`, replies by `reply`:
//!
//! ```text
//! → {"cmd":"status"}
//! ← {"reply":"status","started_at_unix":..,"policies":3,"outstanding":1,"dispatches":[..],..}
//! → {"cmd":"reload"}
//! ← {"reply":"reloaded","policies":3,"skipped":[]}
//! → {"cmd":"stop"}
//! ← {"reply":"stopping"}
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use datasync_core::PolicyLoad;
use datasync_notify::TaskInfo;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, DaemonError};

const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum ControlRequest {
    Status,
    Reload,
    Stop,
}

/// Runtime snapshot returned for [`ControlRequest::Status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub started_at_unix: u64,
    pub policies: usize,
    pub outstanding: usize,
    pub dispatches: Vec<TaskInfo>,
    pub config_dir: PathBuf,
    pub incoming_dir: PathBuf,
    pub outgoing_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPolicyFile {
    pub path: PathBuf,
    pub error: String,
}

/// What a reload picked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadSummary {
    pub policies: usize,
    pub skipped: Vec<SkippedPolicyFile>,
}

impl From<&PolicyLoad> for ReloadSummary {
    fn from(load: &PolicyLoad) -> Self {
        Self {
            policies: load.policies.len(),
            skipped: load
                .skipped
                .iter()
                .map(|s| SkippedPolicyFile {
                    path: s.path.clone(),
                    error: s.error.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "lowercase")]
pub enum ControlResponse {
    Status(DaemonStatus),
    Reloaded(ReloadSummary),
    Stopping,
    Error { message: String },
}

impl ControlResponse {
    pub fn error(message: impl Into<String>) -> Self {
        ControlResponse::Error {
            message: message.into(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ControlResponse::Status(_) => "status",
            ControlResponse::Reloaded(_) => "reloaded",
            ControlResponse::Stopping => "stopping",
            ControlResponse::Error { .. } => "error",
        }
    }
}

/// Blocking client for the control socket. Each call opens its own connection.
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket: PathBuf,
}

impl ControlClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn status(&self) -> Result<DaemonStatus, DaemonError> {
        match self.call(ControlRequest::Status)? {
            ControlResponse::Status(status) => Ok(status),
            other => Err(unexpected(ControlRequest::Status, &other)),
        }
    }

    pub fn reload(&self) -> Result<ReloadSummary, DaemonError> {
        match self.call(ControlRequest::Reload)? {
            ControlResponse::Reloaded(summary) => Ok(summary),
            other => Err(unexpected(ControlRequest::Reload, &other)),
        }
    }

    pub fn stop(&self) -> Result<(), DaemonError> {
        match self.call(ControlRequest::Stop)? {
            ControlResponse::Stopping => Ok(()),
            other => Err(unexpected(ControlRequest::Stop, &other)),
        }
    }

    /// Send one request and read one reply. An `error` reply is returned as
    /// [`DaemonError::Protocol`].
    pub fn call(&self, request: ControlRequest) -> Result<ControlResponse, DaemonError> {
        let mut stream = self.connect()?;
        stream
            .set_read_timeout(Some(REPLY_TIMEOUT))
            .map_err(|e| io_err(&self.socket, e))?;

        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        stream
            .write_all(&line)
            .map_err(|e| io_err(&self.socket, e))?;

        let mut reply = String::new();
        let read = BufReader::new(stream)
            .read_line(&mut reply)
            .map_err(|e| io_err(&self.socket, e))?;
        if read == 0 {
            return Err(DaemonError::Protocol(format!(
                "daemon hung up without answering {request:?}"
            )));
        }

        match serde_json::from_str(reply.trim_end())? {
            ControlResponse::Error { message } => Err(DaemonError::Protocol(message)),
            response => Ok(response),
        }
    }

    fn connect(&self) -> Result<UnixStream, DaemonError> {
        UnixStream::connect(&self.socket).map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => DaemonError::DaemonNotRunning {
                socket: self.socket.clone(),
            },
            _ => io_err(&self.socket, err),
        })
    }
}

fn unexpected(request: ControlRequest, response: &ControlResponse) -> DaemonError {
    DaemonError::Protocol(format!(
        "unexpected '{}' reply to {request:?}",
        response.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_are_tagged_by_cmd() {
        assert_eq!(
            serde_json::to_value(ControlRequest::Reload).expect("encode"),
            json!({ "cmd": "reload" })
        );
        let stop: ControlRequest = serde_json::from_str(r#"{"cmd":"stop"}"#).expect("decode");
        assert_eq!(stop, ControlRequest::Stop);
        assert!(serde_json::from_str::<ControlRequest>(r#"{"cmd":"sync"}"#).is_err());
    }

    #[test]
    fn replies_carry_payload_next_to_tag() {
        let reply = ControlResponse::Reloaded(ReloadSummary {
            policies: 2,
            skipped: vec![SkippedPolicyFile {
                path: PathBuf::from("/etc/datasync/config.d/bad.json"),
                error: "expected value".to_string(),
            }],
        });
        let value = serde_json::to_value(&reply).expect("encode");
        assert_eq!(value["reply"], json!("reloaded"));
        assert_eq!(value["policies"], json!(2));
        assert_eq!(
            value["skipped"][0]["path"],
            json!("/etc/datasync/config.d/bad.json")
        );
        assert_eq!(
            serde_json::to_value(ControlResponse::Stopping).expect("encode"),
            json!({ "reply": "stopping" })
        );
    }

    #[test]
    fn missing_socket_reports_not_running() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let err = ControlClient::new(dir.path().join("datasync.sock"))
            .stop()
            .expect_err("no daemon");
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }

    #[test]
    fn error_reply_and_mismatched_reply_are_protocol_errors() {
        use std::os::unix::net::UnixListener;

        let dir = tempfile::TempDir::new().expect("tempdir");
        let socket = dir.path().join("datasync.sock");
        let listener = UnixListener::bind(&socket).expect("bind");
        let server = std::thread::spawn(move || {
            for reply in [
                ControlResponse::error("policy directory unreadable"),
                ControlResponse::Stopping,
            ] {
                let (stream, _) = listener.accept().expect("accept");
                let mut reader = BufReader::new(stream.try_clone().expect("clone"));
                let mut line = String::new();
                reader.read_line(&mut line).expect("read request");
                let mut writer = stream;
                serde_json::to_writer(&mut writer, &reply).expect("write reply");
                writer.write_all(b"\n").expect("newline");
            }
        });

        let client = ControlClient::new(&socket);
        let err = client.reload().expect_err("error reply");
        assert!(err.to_string().contains("policy directory unreadable"));
        let err = client.status().expect_err("wrong reply");
        assert!(err.to_string().contains("unexpected 'stopping' reply to Status"));
        server.join().expect("server thread");
    }
}
