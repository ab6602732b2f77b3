//! `guardctl` command line.
//!
//! Every subcommand is one connection: handshake, one request, exit.
//! `watch` keeps the connection and prints a line per state change.
//! Exit status is 0 when the daemon accepted the command, 1 when it
//! ignored it, and an error otherwise.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use guard_core::{SaverCommand, SessionState};
use guard_protocol::{default_socket_path, Atom, CommandResult, StatusProperty};
use tracing_subscriber::EnvFilter;

use crate::client::GuardClient;

/// Control a running saverguard daemon
#[derive(Parser, Debug)]
#[command(name = "guardctl", version, about)]
pub struct Args {
    /// Display socket path (default: $GUARD_SOCKET or $XDG_RUNTIME_DIR/saverguard.sock)
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// More logging; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Blank the screen now
    Activate,
    /// Pretend there was user input (unblanks, or starts unlocking)
    Deactivate,
    /// Blank the screen without running a program
    Blank,
    /// Lock the screen now
    Lock,
    /// Run a program: the n-th configured one, or per the current mode
    Demo {
        /// Program number, starting at 1
        n: Option<u32>,
    },
    /// Switch to the n-th program
    Select {
        /// Program number, starting at 1
        n: u32,
    },
    /// Switch to another program now
    Cycle,
    /// Switch to the next program
    Next,
    /// Switch to the previous program
    Prev,
    /// Stop the daemon
    Exit,
    /// Restart the daemon
    Restart,
    /// Print the current state
    Status,
    /// Print the daemon version and identity
    Version,
    /// Print a line for every state change until interrupted
    Watch,
}

impl Command {
    /// The command this subcommand sends, if it sends one.
    pub fn saver_command(&self) -> Option<SaverCommand> {
        let cmd = match *self {
            Self::Activate => SaverCommand::Activate,
            Self::Deactivate => SaverCommand::Deactivate,
            Self::Blank => SaverCommand::Blank,
            Self::Lock => SaverCommand::Lock,
            Self::Demo { n } => SaverCommand::Demo(n),
            Self::Select { n } => SaverCommand::Select(n),
            Self::Cycle => SaverCommand::Cycle,
            Self::Next => SaverCommand::Next,
            Self::Prev => SaverCommand::Prev,
            Self::Exit => SaverCommand::Exit,
            Self::Restart => SaverCommand::Restart,
            Self::Status | Self::Version | Self::Watch => return None,
        };
        Some(cmd)
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let mut filter = EnvFilter::from_default_env();
    for krate in ["guardctl", "guard_protocol"] {
        if let Ok(directive) = format!("{krate}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);
    run(args)
}

#[tokio::main(flavor = "current_thread")]
async fn run(args: Args) -> Result<ExitCode> {
    let socket_path = args.socket.clone().unwrap_or_else(default_socket_path);
    let mut client = GuardClient::connect(&socket_path)
        .await
        .with_context(|| format!("Cannot reach daemon at {}", socket_path.display()))?;

    let code = if let Some(cmd) = args.command.saver_command() {
        let result = client.send_command(cmd).await?;
        match result {
            CommandResult::Accepted => ExitCode::SUCCESS,
            CommandResult::Ignored { reason } => {
                eprintln!("guardctl: {} ignored: {}", cmd.name(), reason.describe());
                ExitCode::FAILURE
            }
        }
    } else {
        match args.command {
            Command::Status => {
                let status = client.status().await?;
                println!("{}", describe_status(&status));
                ExitCode::SUCCESS
            }
            Command::Version => {
                let (version, id) = client.version().await?;
                match id {
                    Some(id) => println!("saverguard {version} is running as {id}"),
                    None => println!("saverguard {version}"),
                }
                ExitCode::SUCCESS
            }
            _ => {
                watch(&mut client).await?;
                ExitCode::SUCCESS
            }
        }
    };

    client.disconnect().await;
    Ok(code)
}

/// Prints one line per state or program change until the daemon goes away.
async fn watch(client: &mut GuardClient) -> Result<()> {
    client.subscribe().await?;
    let mut last: Option<StatusProperty> = None;

    loop {
        let change = match client.next_change().await {
            Ok(change) => change,
            Err(crate::ClientError::Closed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if change.atom != Atom::SCREENSAVER_STATUS {
            continue;
        }
        let status = StatusProperty::from_value(&change.value)?;
        if let Some(line) = watch_line(last.as_ref(), &status) {
            println!("{line}");
        }
        last = Some(status);
    }
}

fn watch_word(state: SessionState) -> &'static str {
    match state {
        SessionState::Unlocked => "UNBLANK",
        SessionState::Blanked => "BLANK",
        SessionState::Locked => "LOCK",
        SessionState::Authenticating => "AUTH",
    }
}

/// The `watch` line for moving from `previous` to `status`, if any.
///
/// A state change prints the state word and time; a program change while
/// the state holds prints `RUN <n>`. The first status seen is not a change.
pub fn watch_line(previous: Option<&StatusProperty>, status: &StatusProperty) -> Option<String> {
    let previous = previous?;
    if previous.state != status.state {
        Some(format!(
            "{} {}",
            watch_word(status.state),
            local_time(status.changed_at)
        ))
    } else if previous.demo != status.demo && status.demo != 0 {
        Some(format!("RUN {}", status.demo))
    } else {
        None
    }
}

/// Human-readable status, e.g. `screen locked since Fri Oct 16 10:00:00 2026`.
pub fn describe_status(status: &StatusProperty) -> String {
    let what = match status.state {
        SessionState::Unlocked => "non-blanked",
        SessionState::Blanked => "blanked",
        SessionState::Locked => "locked",
        SessionState::Authenticating => "locked (authenticating)",
    };
    let mut line = format!("screen {what} since {}", local_time(status.changed_at));
    if status.state.is_active() && status.demo != 0 {
        line.push_str(&format!(" (program {})", status.demo));
    }
    line
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%a %b %e %H:%M:%S %Y").to_string()
}
