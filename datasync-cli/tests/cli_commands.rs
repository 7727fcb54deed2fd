use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::str::contains;

const NOTIFYING_POLICY: &str = r#"{
    "Files": [{
        "Path": "/var/lib/app/state.db",
        "SyncDirection": "Active2Passive",
        "SyncType": "Immediate",
        "NotifySibling": {
            "Mode": "Systemd",
            "NotifyServices": ["app.service"],
            "Method": "Reload"
        }
    }]
}"#;

fn datasync_cmd(config: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("datasync"));
    cmd.arg("--config").arg(config);
    cmd
}

/// Daemon config rooted in `root`, with the policy dir at `root/config.d`.
fn write_daemon_config(root: &TempDir) -> PathBuf {
    let config = root.child("daemon.json");
    let body = serde_json::json!({
        "config_dir": root.path().join("config.d"),
        "outgoing_dir": root.path().join("outgoing"),
        "incoming_dir": root.path().join("incoming"),
        "socket_path": root.path().join("run/datasync.sock"),
        "retry_attempts": 0,
        "retry_interval_secs": 0,
    });
    config.write_str(&body.to_string()).expect("write config");
    config.path().to_path_buf()
}

#[test]
fn validate_lists_accepted_policies() {
    let root = TempDir::new().expect("root");
    root.child("config.d/app.json")
        .write_str(NOTIFYING_POLICY)
        .expect("policy");
    let config = write_daemon_config(&root);

    datasync_cmd(&config)
        .arg("validate")
        .assert()
        .success()
        .stdout(contains("1 policies accepted"))
        .stdout(contains("/var/lib/app/state.db"))
        .stdout(contains("notify=Systemd Reload -> app.service"));
}

#[test]
fn validate_fails_when_a_file_is_rejected() {
    let root = TempDir::new().expect("root");
    let dir = root.child("policies");
    dir.child("good.json").write_str(NOTIFYING_POLICY).expect("good");
    dir.child("bad.json").write_str("{ nope").expect("bad");
    let config = write_daemon_config(&root);

    datasync_cmd(&config)
        .arg("validate")
        .arg(dir.path())
        .assert()
        .failure()
        .stdout(contains("1 policies accepted"))
        .stderr(contains("bad.json"))
        .stderr(contains("1 policy file(s) rejected"));
}

#[test]
fn validate_json_report() {
    let root = TempDir::new().expect("root");
    root.child("config.d/app.json")
        .write_str(NOTIFYING_POLICY)
        .expect("policy");
    let config = write_daemon_config(&root);

    let output = datasync_cmd(&config)
        .args(["validate", "--json"])
        .output()
        .expect("run validate");
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["policies"][0]["sync_type"], "Immediate");
    assert_eq!(report["skipped"], serde_json::json!([]));
}

#[test]
fn notify_writes_request_into_outgoing_dir() {
    let root = TempDir::new().expect("root");
    root.child("config.d/app.json")
        .write_str(NOTIFYING_POLICY)
        .expect("policy");
    let config = write_daemon_config(&root);

    let output = datasync_cmd(&config)
        .args(["notify", "--policy", "/var/lib/app/state.db", "/var/lib/app/state.db"])
        .output()
        .expect("run notify");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let written = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    assert!(written.starts_with(root.path().join("outgoing")));
    let request: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&written).expect("read request")).expect("json");
    assert_eq!(request["ModifiedDataPath"], "/var/lib/app/state.db");
    assert_eq!(request["NotifyInfo"]["NotifyServices"][0], "app.service");
}

#[test]
fn notify_rejects_unknown_policy() {
    let root = TempDir::new().expect("root");
    root.child("config.d/app.json")
        .write_str(NOTIFYING_POLICY)
        .expect("policy");
    let config = write_daemon_config(&root);

    datasync_cmd(&config)
        .args(["notify", "--policy", "/etc/other", "/etc/other/x"])
        .assert()
        .failure()
        .stderr(contains("no policy configured for /etc/other"));
}

#[test]
fn dispatch_of_unsupported_mode_removes_request() {
    let root = TempDir::new().expect("root");
    let config = write_daemon_config(&root);
    let request = root.child("incoming/notify_x.json");
    request
        .write_str(
            r#"{"ModifiedDataPath": "/var/lib/app/state.db",
                "NotifyInfo": {"Mode": "Carrier", "NotifyServices": ["app.service"]}}"#,
        )
        .expect("request");

    datasync_cmd(&config)
        .arg("dispatch")
        .arg(request.path())
        .assert()
        .failure()
        .stderr(contains("unsupported notify mode 'Carrier'"));
    assert!(!request.path().exists(), "processed request is removed");
}

#[test]
fn dispatch_of_malformed_request_keeps_file() {
    let root = TempDir::new().expect("root");
    let config = write_daemon_config(&root);
    let request = root.child("incoming/notify_bad.json");
    request.write_str("{ truncated").expect("request");

    datasync_cmd(&config)
        .arg("dispatch")
        .arg(request.path())
        .assert()
        .failure()
        .stderr(contains("failed to dispatch"));
    assert!(request.path().exists(), "malformed request stays for inspection");
}

#[test]
fn status_without_daemon_reports_not_running() {
    let root = TempDir::new().expect("root");
    let config = write_daemon_config(&root);

    datasync_cmd(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
}
