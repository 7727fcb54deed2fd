//! `datasync daemon|status|reload|stop` — daemon lifecycle over the control socket.

use anyhow::{Context, Result};
use serde::Serialize;

use datasync_daemon::{start_blocking, ControlClient, DaemonConfig, DaemonError};

pub fn start(config: DaemonConfig) -> Result<()> {
    start_blocking(config).context("daemon exited with error")
}

pub fn status(config: &DaemonConfig) -> Result<()> {
    let client = ControlClient::new(&config.socket_path);
    match client.status() {
        Ok(status) => print_json(&status),
        Err(DaemonError::DaemonNotRunning { .. }) => print_json(&serde_json::json!({
            "running": false,
            "socket": client.socket(),
        })),
        Err(err) => Err(err).context("failed to query daemon status"),
    }
}

pub fn reload(config: &DaemonConfig) -> Result<()> {
    match ControlClient::new(&config.socket_path).reload() {
        Ok(summary) => {
            for skipped in &summary.skipped {
                eprintln!("rejected {}: {}", skipped.path.display(), skipped.error);
            }
            println!("reloaded {} policies", summary.policies);
            Ok(())
        }
        Err(DaemonError::DaemonNotRunning { .. }) => {
            println!("daemon is not running");
            Ok(())
        }
        Err(err) => Err(err).context("failed to reload daemon"),
    }
}

pub fn stop(config: &DaemonConfig) -> Result<()> {
    match ControlClient::new(&config.socket_path).stop() {
        Ok(()) => println!("daemon stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon response JSON")?
    );
    Ok(())
}
