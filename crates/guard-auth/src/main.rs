//! guard-auth - privilege-separated authenticator
//!
//! Spawned by `guardd` when input arrives while the session is locked.
//!
//! # Usage
//!
//! ```bash
//! # Authenticate the current user on this terminal
//! guard-auth --timeout 30
//!
//! # Check that a backend initializes and privileges drop cleanly
//! guard-auth --init -vv
//!
//! # Use a credential file instead of the system password helper
//! guard-auth --backend file --passwd-file /etc/saverguard/passwd
//! ```

fn main() {
    std::process::exit(guard_auth::cli::main());
}
