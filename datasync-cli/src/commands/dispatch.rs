//! `datasync dispatch` — process one request file in the foreground.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use datasync_daemon::{build_transports, dispatch_once, init_tracing, DaemonConfig};
use datasync_notify::DispatchOutcome;

/// Arguments for `datasync dispatch`.
#[derive(Args, Debug)]
pub struct DispatchArgs {
    /// Request file to process; removed once processed.
    pub request: PathBuf,
}

impl DispatchArgs {
    pub fn run(self, config: DaemonConfig) -> Result<()> {
        init_tracing();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;

        let transports = build_transports(&config);
        let outcome = runtime
            .block_on(dispatch_once(&config, transports, &self.request))
            .with_context(|| format!("failed to dispatch {}", self.request.display()))?;

        match &outcome {
            DispatchOutcome::Notified { mode, targets } => {
                for target in targets {
                    let state = if target.outcome.is_success() {
                        "notified"
                    } else {
                        "exhausted"
                    };
                    println!(
                        "{mode} {} {state} after {} attempt(s)",
                        target.service,
                        target.outcome.attempts()
                    );
                }
            }
            DispatchOutcome::NotActionable { mode } => {
                println!("{mode} requests cannot be acted on by this node");
            }
            DispatchOutcome::UnsupportedMode { mode } => {
                bail!("request uses unsupported notify mode '{mode}'");
            }
        }

        let exhausted = outcome.exhausted();
        if !exhausted.is_empty() {
            bail!("services not notified: {}", exhausted.join(", "));
        }
        Ok(())
    }
}
