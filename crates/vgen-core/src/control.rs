//! Control-socket location shared by the daemon (`vgen run`) and the admin
//! CLI commands that talk to it.

use std::path::PathBuf;

/// Default path for the control socket (same XDG state dir as the logs).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("vgen")?.get_state_home();
    Ok(dir.join("control.sock"))
}
