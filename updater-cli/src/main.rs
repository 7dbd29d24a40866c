//! swarm-updater — keep Docker Swarm services on the latest image digest.
//!
//! # Usage
//!
//! ```text
//! swarm-updater daemon start|stop|status
//! swarm-updater sweep [--once] [--image <prefix>]... [--json]
//! swarm-updater config
//! ```
//!
//! Global flags (`--host`, `--label-enable`, `--blacklist`, `--interval` or
//! `--schedule`, `--max-threads`, ...) are accepted by every subcommand and fall back to
//! their environment variables.

mod commands;
mod settings;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{daemon::DaemonCommand, sweep::SweepArgs};
use settings::GlobalArgs;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "swarm-updater",
    version,
    about = "Automatically update Docker Swarm services to their latest image digest",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or control the background updater.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Update eligible services once and print the report.
    Sweep(SweepArgs),

    /// Validate settings and print the effective configuration.
    Config,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    updater_daemon::init_tracing(cli.global.debug, cli.global.log_json);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting swarm-updater");

    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command, &cli.global),
        Commands::Sweep(args) => args.run(&cli.global),
        Commands::Config => commands::config::run(&cli.global),
    }
}
