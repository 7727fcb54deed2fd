//! `datasync validate` — check a policy directory without starting the daemon.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;

use datasync_core::{load_policy_dir, SyncPolicyRecord, SyncType};
use datasync_daemon::DaemonConfig;

/// Arguments for `datasync validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Policy directory; defaults to the configured one.
    pub dir: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct PolicyRow {
    path: String,
    direction: String,
    sync_type: String,
    retry: Option<String>,
    notify: Option<String>,
}

#[derive(Debug, Serialize)]
struct SkippedRow {
    file: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct Report {
    dir: String,
    policies: Vec<PolicyRow>,
    skipped: Vec<SkippedRow>,
}

impl ValidateArgs {
    pub fn run(self, config: &DaemonConfig) -> Result<()> {
        let dir = self.dir.unwrap_or_else(|| config.config_dir.clone());
        if !dir.is_dir() {
            bail!("policy directory not found: {}", dir.display());
        }

        let load = load_policy_dir(&dir)
            .with_context(|| format!("failed to read policy directory {}", dir.display()))?;
        let report = Report {
            dir: dir.display().to_string(),
            policies: load.policies.iter().map(policy_row).collect(),
            skipped: load
                .skipped
                .iter()
                .map(|s| SkippedRow {
                    file: s.path.display().to_string(),
                    error: s.error.to_string(),
                })
                .collect(),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render report JSON")?
            );
        } else {
            print_report(&report);
        }

        if !report.skipped.is_empty() {
            bail!("{} policy file(s) rejected", report.skipped.len());
        }
        Ok(())
    }
}

fn policy_row(policy: &SyncPolicyRecord) -> PolicyRow {
    PolicyRow {
        path: policy.path.display().to_string(),
        direction: policy.sync_direction.to_string(),
        sync_type: match policy.sync_type {
            SyncType::Immediate => "Immediate".to_string(),
            SyncType::Periodic { periodicity } => {
                format!("Periodic({}s)", periodicity.as_secs())
            }
        },
        retry: policy
            .retry
            .map(|r| format!("{} x {}s", r.attempts, r.interval.as_secs())),
        notify: policy.notify_sibling.as_ref().map(|info| {
            let method = info
                .method
                .as_ref()
                .map(|m| format!(" {m}"))
                .unwrap_or_default();
            format!("{}{} -> {}", info.mode, method, info.services.join(","))
        }),
    }
}

fn print_report(report: &Report) {
    println!("{} policies accepted from {}", report.policies.len(), report.dir);
    for row in &report.policies {
        print!("  {}  {}  {}", row.path, row.direction, row.sync_type);
        if let Some(retry) = &row.retry {
            print!("  retry={retry}");
        }
        if let Some(notify) = &row.notify {
            print!("  notify={notify}");
        }
        println!();
    }
    for skipped in &report.skipped {
        eprintln!("rejected {}: {}", skipped.file, skipped.error);
    }
}
