//! End-to-end daemon run: startup recovery, live requests, status and stop.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use datasync_daemon::{run, ControlClient, DaemonConfig};
use datasync_notify::{ServiceManager, TransportError, Transports, UnitAction};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingManager {
    calls: Mutex<Vec<(String, UnitAction)>>,
}

impl RecordingManager {
    fn calls(&self) -> Vec<(String, UnitAction)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ServiceManager for RecordingManager {
    async fn invoke_unit_action(
        &self,
        unit: &str,
        action: UnitAction,
    ) -> Result<bool, TransportError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((unit.to_string(), action));
        Ok(true)
    }
}

fn config_for(root: &Path) -> DaemonConfig {
    DaemonConfig {
        config_dir: root.join("config.d"),
        outgoing_dir: root.join("outgoing"),
        incoming_dir: root.join("incoming"),
        socket_path: root.join("run").join("datasync.sock"),
        retry_attempts: 0,
        retry_interval_secs: 0,
        drain_timeout_secs: 5,
        dbus_notify: None,
        watch_policies: false,
    }
}

fn write_request(dir: &Path, name: &str, service: &str, method: &str) -> PathBuf {
    std::fs::create_dir_all(dir).expect("incoming dir");
    let body = format!(
        r#"{{"ModifiedDataPath": "/var/lib/app/state.db",
            "NotifyInfo": {{"Mode": "Systemd", "NotifyServices": ["{service}"], "Method": "{method}"}}}}"#
    );
    let tmp = dir.join(format!("{name}.tmp"));
    let path = dir.join(name);
    std::fs::write(&tmp, body).expect("write request");
    std::fs::rename(&tmp, &path).expect("publish request");
    path
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn stop_daemon(client: ControlClient) {
    tokio::task::spawn_blocking(move || client.stop())
        .await
        .expect("join")
        .expect("stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daemon_dispatches_pending_and_live_requests() {
    let root = TempDir::new().expect("tempdir");
    let config = config_for(root.path());
    let pending = write_request(&config.incoming_dir, "notify_0.json", "early.service", "Reload");

    let manager = Arc::new(RecordingManager::default());
    let daemon = tokio::spawn(run(config.clone(), Transports::new(manager.clone())));

    let socket = config.socket_path.clone();
    wait_until("control socket", || socket.exists()).await;
    wait_until("pending request removal", || !pending.exists()).await;

    let live = write_request(&config.incoming_dir, "notify_1.json", "late.service", "Restart");
    wait_until("live request removal", || !live.exists()).await;

    let calls = manager.calls();
    assert!(calls.contains(&("early.service".to_string(), UnitAction::Reload)));
    assert!(calls.contains(&("late.service".to_string(), UnitAction::Restart)));

    let client = ControlClient::new(&socket);
    let status = {
        let client = client.clone();
        tokio::task::spawn_blocking(move || client.status())
            .await
            .expect("join")
            .expect("status")
    };
    assert_eq!(status.policies, 0);
    assert_eq!(status.outstanding, 0);
    assert_eq!(status.incoming_dir, config.incoming_dir);

    stop_daemon(client).await;

    tokio::time::timeout(Duration::from_secs(10), daemon)
        .await
        .expect("daemon exits after stop")
        .expect("join")
        .expect("clean shutdown");
    assert!(!socket.exists(), "socket removed on shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_request_is_left_for_inspection() {
    let root = TempDir::new().expect("tempdir");
    let config = config_for(root.path());
    std::fs::create_dir_all(&config.incoming_dir).expect("incoming dir");
    let broken = config.incoming_dir.join("notify_bad.json");
    std::fs::write(&broken, "{ not json").expect("write");

    let manager = Arc::new(RecordingManager::default());
    let daemon = tokio::spawn(run(config.clone(), Transports::new(manager.clone())));

    let socket = config.socket_path.clone();
    wait_until("control socket", || socket.exists()).await;

    let good = write_request(&config.incoming_dir, "notify_good.json", "foo.service", "Reload");
    wait_until("good request removal", || !good.exists()).await;
    assert!(broken.exists(), "malformed request must stay on disk");
    assert_eq!(manager.calls().len(), 1);

    stop_daemon(ControlClient::new(&socket)).await;
    tokio::time::timeout(Duration::from_secs(10), daemon)
        .await
        .expect("daemon exits after stop")
        .expect("join")
        .expect("clean shutdown");
}
