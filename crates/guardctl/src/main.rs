//! guardctl - send commands to a running saverguard daemon
//!
//! # Usage
//!
//! ```bash
//! # Blank the screen now
//! guardctl activate
//!
//! # Lock immediately
//! guardctl lock
//!
//! # Run the third configured program
//! guardctl demo 3
//!
//! # Print state changes as they happen
//! guardctl watch
//! ```

use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    guardctl::cli::main()
}
