//! `swarm-updater daemon` — scheduled updates and their control socket.

use anyhow::{Context, Result};
use clap::Subcommand;

use updater_daemon::paths::socket_path;
use updater_daemon::{request_status, request_stop, start_blocking, DaemonError, DaemonOptions};

use crate::settings::GlobalArgs;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the scheduler and control socket in the foreground.
    Start,
    /// Request graceful daemon shutdown over the control socket.
    Stop,
    /// Query daemon runtime status over the control socket.
    Status,
}

pub fn run(command: DaemonCommand, global: &GlobalArgs) -> Result<()> {
    let state = global.state_dir()?;

    match command {
        DaemonCommand::Start => {
            let (settings, guard) = global.build_guard()?;
            let options = DaemonOptions {
                state_dir: state,
                schedule: settings.schedule()?,
            };
            start_blocking(options, guard).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&state) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => {
            let status = match request_status(&state) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(&state).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&status)
                    .context("failed to render daemon status JSON")?
            );
        }
    }

    Ok(())
}
