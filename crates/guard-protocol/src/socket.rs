//! Location of the display socket.

use std::path::PathBuf;

/// Environment variable that overrides the socket path.
pub const SOCKET_ENV: &str = "GUARD_SOCKET";

const SOCKET_NAME: &str = "saverguard.sock";

/// `$GUARD_SOCKET`, else `$XDG_RUNTIME_DIR/saverguard.sock`, else the
/// same name in the temp directory.
pub fn default_socket_path() -> PathBuf {
    if let Some(path) = std::env::var_os(SOCKET_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_NAME)
}
