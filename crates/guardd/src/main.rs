//! guardd - saverguard session daemon
//!
//! Blanks the screen after a period of inactivity, runs display hacks,
//! locks the session and hands unlocking to `guard-auth`.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! guardd start
//!
//! # Start the daemon (background/daemonized)
//! guardd start -d
//!
//! # Stop the daemon
//! guardd stop
//!
//! # Use another preferences file and socket
//! guardd --init-file ~/.saverguard.test --socket /tmp/guard.sock start
//!
//! # Enable debug logging
//! RUST_LOG=guardd=debug guardd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

fn main() -> anyhow::Result<()> {
    guardd::cli::main()
}
