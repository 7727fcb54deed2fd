//! `datasync notify` — write a sibling notification request by hand.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Args;

use datasync_core::load_policy_dir;
use datasync_daemon::DaemonConfig;
use datasync_notify::NotifyProducer;

/// Arguments for `datasync notify`.
#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// `Path` of the policy whose notification settings apply.
    #[arg(long)]
    pub policy: PathBuf,

    /// The changed file or directory.
    pub changed: PathBuf,

    /// Write into this directory instead of the configured outgoing one.
    #[arg(long)]
    pub outgoing: Option<PathBuf>,
}

impl NotifyArgs {
    pub fn run(self, config: &DaemonConfig) -> Result<()> {
        let load = load_policy_dir(&config.config_dir).with_context(|| {
            format!("failed to read policy directory {}", config.config_dir.display())
        })?;
        let policy = load
            .policies
            .get(&self.policy)
            .ok_or_else(|| anyhow!("no policy configured for {}", self.policy.display()))?;

        let outgoing = self.outgoing.unwrap_or_else(|| config.outgoing_dir.clone());
        let producer = NotifyProducer::new(outgoing);
        let written = producer
            .produce(policy, &self.changed)
            .context("failed to write notification request")?;
        println!("{}", written.display());
        Ok(())
    }
}
