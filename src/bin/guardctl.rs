//! guardctl - send commands to a running saverguard daemon

use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    guardctl::cli::main()
}
