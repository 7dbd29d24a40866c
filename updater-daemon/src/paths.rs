use std::path::{Path, PathBuf};

use crate::error::DaemonError;

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const STATE_DIR_NAME: &str = ".swarm-updater";

/// `explicit` when given, else `~/.swarm-updater`.
pub fn state_dir(explicit: Option<&Path>) -> Result<PathBuf, DaemonError> {
    match explicit {
        Some(dir) => Ok(dir.to_path_buf()),
        None => dirs::home_dir()
            .map(|home| home.join(STATE_DIR_NAME))
            .ok_or(DaemonError::NoStateDir),
    }
}

pub fn socket_path(state: &Path) -> PathBuf {
    state.join(DAEMON_SOCKET)
}
