//! datasync — sibling notification daemon and operator tools.
//!
//! # Usage
//!
//! ```text
//! datasync [--config <file>] daemon
//! datasync [--config <file>] status|reload|stop
//! datasync validate [<dir>] [--json]
//! datasync [--config <file>] notify --policy <path> <changed>
//! datasync [--config <file>] dispatch <request>
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{dispatch::DispatchArgs, notify::NotifyArgs, validate::ValidateArgs};
use datasync_daemon::config::DEFAULT_CONFIG_PATH;
use datasync_daemon::DaemonConfig;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "datasync",
    version,
    about = "Notify sibling-node services about synchronized data",
    long_about = None,
)]
struct Cli {
    /// Daemon configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon in the foreground.
    Daemon,

    /// Query daemon runtime status over the control socket.
    Status,

    /// Ask the daemon to re-read its policy directory.
    Reload,

    /// Request graceful daemon shutdown.
    Stop,

    /// Parse a policy directory and report accepted and rejected files.
    Validate(ValidateArgs),

    /// Write a notification request for a changed path.
    Notify(NotifyArgs),

    /// Process one request file in the foreground.
    Dispatch(DispatchArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DaemonConfig::load(&cli.config)
        .with_context(|| format!("failed to load daemon config {}", cli.config.display()))?;

    match cli.command {
        Commands::Daemon => commands::daemon::start(config),
        Commands::Status => commands::daemon::status(&config),
        Commands::Reload => commands::daemon::reload(&config),
        Commands::Stop => commands::daemon::stop(&config),
        Commands::Validate(args) => args.run(&config),
        Commands::Notify(args) => args.run(&config),
        Commands::Dispatch(args) => args.run(config),
    }
}
