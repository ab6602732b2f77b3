//! `guardd` command line.
//!
//! `start` runs the daemon (optionally forked into the background),
//! `stop` signals a running daemon and `status` reports on it. The PID
//! and log files live under `$XDG_STATE_HOME/saverguard`.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use guard_core::Preferences;
use guard_protocol::{default_socket_path, SOCKET_ENV};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::activity::{
    activity_channel, spawn_activity_forwarder, spawn_idle_poller, ActivitySender, TtyIdle,
};
use crate::config::{ActivitySource, DaemonConfig};
use crate::prefs::{load_preferences, spawn_prefs_watcher};
use crate::root::{local_identity, spawn_status_publisher, RootWindow};
use crate::server::DaemonServer;
use crate::session::{spawn_session, ExitKind, SessionSettings};

/// saverguard daemon - idle blanking and screen locking
#[derive(Parser, Debug)]
#[command(name = "guardd", version, about)]
pub struct Args {
    /// Daemon settings file (default: $XDG_CONFIG_HOME/saverguard/guardd.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Preferences dotfile (default: ~/.saverguard)
    #[arg(long, global = true)]
    pub init_file: Option<PathBuf>,

    /// Display socket path (default: $GUARD_SOCKET or $XDG_RUNTIME_DIR/saverguard.sock)
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Terminal for the unlock prompt (default: `tty` from the config, else stdin's)
    #[arg(long, global = true)]
    pub tty: Option<PathBuf>,

    /// More logging; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

impl Args {
    /// `-v` wins; otherwise the `verbose` preference means debug.
    fn log_level(&self, prefs: Option<&Preferences>) -> &'static str {
        match self.verbose {
            0 if prefs.is_some_and(|p| p.verbose) => "debug",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Command line, then the config file, then the terminal on stdin.
    fn terminal(&self, config: &DaemonConfig) -> Option<PathBuf> {
        self.tty.clone().or_else(|| config.terminal())
    }
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("saverguard")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("guardd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("guardd.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// PID of another running daemon. A restarted daemon keeps its PID, so
/// our own is never "another".
fn is_daemon_running() -> Option<u32> {
    let pid = read_pid()?;
    if pid != process::id() && is_process_running(pid) {
        return Some(pid);
    }
    if pid != process::id() {
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    let Ok(raw) = i32::try_from(pid) else {
        bail!("Invalid PID {pid}");
    };
    // SAFETY: kill has no memory-safety preconditions.
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

pub fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'guardd stop' to stop it first.");
                process::exit(1);
            }

            let config = DaemonConfig::load_or_default(args.config.as_deref())?;

            // Detaching loses the terminal, so find it first.
            let tty = args.terminal(&config);
            if daemon && tty.is_none() {
                bail!(
                    "No terminal for the unlock prompt: start guardd from one, \
                     pass --tty, or set `tty` in guardd.toml"
                );
            }

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(&args, config, tty.clone());

            remove_pid_file();

            match result? {
                ExitKind::Shutdown => Ok(()),
                ExitKind::Restart => restart(tty.as_deref()),
            }
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");

                let socket_path = resolve_socket(&args, None);
                if socket_path.exists() {
                    println!("Socket: {}", socket_path.display());
                }

                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

/// Command line, then `$GUARD_SOCKET`, then the config file, then the
/// runtime directory.
fn resolve_socket(args: &Args, config: Option<&DaemonConfig>) -> PathBuf {
    if let Some(path) = &args.socket {
        return path.clone();
    }
    if std::env::var_os(SOCKET_ENV).is_some_and(|p| !p.is_empty()) {
        return default_socket_path();
    }
    config
        .and_then(|c| c.socket_path.clone())
        .unwrap_or_else(default_socket_path)
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

/// Replaces this process with a fresh copy of itself.
///
/// `--daemon` is dropped: the process is already detached. The terminal
/// is passed on, since a detached process cannot find it again.
fn restart(tty: Option<&Path>) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("Cannot locate own executable")?;
    let args = restart_args(std::env::args_os().skip(1), tty);
    info!(exe = %exe.display(), "Restarting daemon");

    let err = process::Command::new(&exe).args(args).exec();
    Err(err).with_context(|| format!("Failed to re-exec {}", exe.display()))
}

fn restart_args(args: impl Iterator<Item = OsString>, tty: Option<&Path>) -> Vec<OsString> {
    let mut out: Vec<OsString> = args.filter(|a| a != "-d" && a != "--daemon").collect();
    if let Some(tty) = tty {
        if !out.iter().any(|a| a == "--tty") {
            out.push("--tty".into());
            out.push(tty.into());
        }
    }
    out
}

fn init_logging(args: &Args, prefs: Option<&Preferences>) {
    let level = args.log_level(prefs);
    let mut filter = EnvFilter::from_default_env();
    for krate in ["guardd", "guard_core", "guard_protocol"] {
        if let Ok(directive) = format!("{krate}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }
    // A restarted daemon re-execs, so this runs once per process.
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if prefs.map_or(true, |p| p.timestamp) {
        let _ = builder.try_init();
    } else {
        let _ = builder.without_time().try_init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn run_daemon(args: &Args, config: DaemonConfig, tty: Option<PathBuf>) -> Result<ExitKind> {
    let init_file = args.init_file.clone().or_else(|| config.init_file());

    // `verbose` and `timestamp` shape the log, so peek before it starts;
    // the full load below reports bad lines.
    let early = init_file
        .as_deref()
        .and_then(|path| Preferences::load(path).ok())
        .map(|loaded| loaded.preferences);
    init_logging(args, early.as_ref());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "saverguard daemon starting"
    );

    let socket_path = resolve_socket(args, Some(&config));

    let (preferences, modified) = match &init_file {
        Some(path) => {
            let loaded = load_preferences(path);
            (loaded.preferences, loaded.modified)
        }
        None => {
            warn!("No home directory; using built-in preferences");
            (Default::default(), None)
        }
    };
    info!(
        timeout = preferences.timeout.as_secs(),
        lock = preferences.lock,
        mode = preferences.mode.name(),
        programs = preferences.programs.len(),
        "Preferences loaded"
    );
    debug!(
        splash = preferences.splash,
        fade = preferences.fade,
        unfade = preferences.unfade,
        "Display effects are kept in the init file but not drawn"
    );
    let poll = preferences.pointer_poll_time;

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    match &tty {
        Some(tty) => info!(tty = %tty.display(), "Unlock prompt terminal"),
        None => warn!("No terminal for the unlock prompt; unlocking will fail"),
    }

    let settings = SessionSettings {
        auth_command: config.auth_command.clone(),
        auth_grace: config.auth_grace(),
        shell: config.shell.clone(),
        tty: tty.clone(),
    };
    let (session, session_task) = spawn_session(preferences, settings, cancel_token.clone());
    info!("Session actor started");

    let root = RootWindow::new();
    root.announce(&local_identity(), env!("CARGO_PKG_VERSION")).await;
    let events = session.subscribe();
    if let Ok(status) = session.status().await {
        root.publish_status(&status).await;
    }
    let _publisher = spawn_status_publisher(root.clone(), events, cancel_token.clone());

    let (activity_tx, activity_rx) = activity_channel();
    let _forwarder = spawn_activity_forwarder(activity_rx, session.clone(), cancel_token.clone());
    start_activity_source(
        config.activity_source,
        tty.as_deref(),
        poll,
        &root,
        activity_tx,
        &cancel_token,
    )
    .await?;

    if let Some(path) = init_file {
        let _watcher = spawn_prefs_watcher(
            path,
            config.prefs_poll_interval(),
            modified,
            session.clone(),
            cancel_token.clone(),
        );
    }

    let server = DaemonServer::new(&socket_path, session, root, cancel_token.clone());

    info!(socket = %socket_path.display(), "Starting server");
    let served = server.run().await;

    // The server also stops when the session exits; make sure both do.
    cancel_token.cancel();
    let exit = session_task.await.unwrap_or_default();

    if let Err(e) = served {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!(?exit, "saverguard daemon stopped");
    Ok(exit)
}

/// Starts whatever reports user input, per `source`.
async fn start_activity_source(
    source: ActivitySource,
    tty: Option<&Path>,
    poll: Duration,
    root: &RootWindow,
    tx: ActivitySender,
    cancel: &CancellationToken,
) -> Result<()> {
    match source {
        ActivitySource::None => {
            info!("No activity source; only commands wake the session");
            Ok(())
        }
        ActivitySource::X11 => start_x11(root, tx, poll, cancel).await,
        ActivitySource::Tty => start_tty(tty, tx, poll, cancel),
        ActivitySource::Auto => {
            let has_display = std::env::var_os("DISPLAY").is_some_and(|d| !d.is_empty());
            if cfg!(feature = "x11") && has_display {
                match start_x11(root, tx.clone(), poll, cancel).await {
                    Ok(()) => return Ok(()),
                    Err(e) => warn!(error = %format!("{e:#}"), "X display unusable, trying the terminal"),
                }
            }
            if tty.is_some() {
                return start_tty(tty, tx, poll, cancel);
            }
            warn!("No display and no terminal; only commands wake the session");
            Ok(())
        }
    }
}

fn start_tty(
    tty: Option<&Path>,
    tx: ActivitySender,
    poll: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let Some(path) = tty else {
        bail!("Terminal activity needs a terminal: pass --tty or set `tty` in guardd.toml");
    };
    spawn_idle_poller(TtyIdle::new(path), poll, tx, cancel.clone());
    Ok(())
}

#[cfg(feature = "x11")]
async fn start_x11(
    root: &RootWindow,
    tx: ActivitySender,
    poll: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    crate::xdisplay::spawn_x11_bridge(root, tx, poll, cancel.clone()).await?;
    Ok(())
}

#[cfg(not(feature = "x11"))]
async fn start_x11(
    _root: &RootWindow,
    _tx: ActivitySender,
    _poll: Duration,
    _cancel: &CancellationToken,
) -> Result<()> {
    bail!("guardd was built without the `x11` feature")
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_foreground_start() {
        let args = Args::parse_from(["guardd"]);
        assert!(args.command.is_none());
        assert_eq!(args.log_level(None), "info");
    }

    #[test]
    fn test_verbose_preference_raises_level() {
        let prefs = Preferences {
            verbose: true,
            ..Preferences::default()
        };
        assert_eq!(Args::parse_from(["guardd"]).log_level(Some(&prefs)), "debug");
        assert_eq!(Args::parse_from(["guardd", "-vv"]).log_level(Some(&prefs)), "trace");
        assert_eq!(Args::parse_from(["guardd"]).log_level(Some(&Preferences::default())), "info");
    }

    #[test]
    fn test_terminal_precedence() {
        let config = DaemonConfig {
            tty: Some(PathBuf::from("/dev/tty2")),
            ..DaemonConfig::default()
        };
        let args = Args::parse_from(["guardd"]);
        assert_eq!(args.terminal(&config), Some(PathBuf::from("/dev/tty2")));

        let args = Args::parse_from(["guardd", "start", "--tty", "/dev/pts/4"]);
        assert_eq!(args.terminal(&config), Some(PathBuf::from("/dev/pts/4")));
    }

    #[tokio::test]
    async fn test_explicit_tty_source_needs_terminal() {
        let cancel = CancellationToken::new();
        let (tx, _rx) = activity_channel();
        let err = start_activity_source(
            ActivitySource::Tty,
            None,
            Duration::from_secs(5),
            &RootWindow::new(),
            tx,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("needs a terminal"));
    }

    #[cfg(not(feature = "x11"))]
    #[tokio::test]
    async fn test_x11_source_without_feature_is_an_error() {
        let cancel = CancellationToken::new();
        let (tx, _rx) = activity_channel();
        let err = start_activity_source(
            ActivitySource::X11,
            None,
            Duration::from_secs(5),
            &RootWindow::new(),
            tx,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("x11"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["guardd", "start", "-d", "--socket", "/tmp/s.sock", "-vv"]);
        assert_eq!(args.command, Some(Command::Start { daemon: true }));
        assert_eq!(args.socket, Some(PathBuf::from("/tmp/s.sock")));
        assert_eq!(args.log_level(None), "trace");
    }

    #[test]
    fn test_socket_precedence() {
        let config = DaemonConfig {
            socket_path: Some(PathBuf::from("/from/config.sock")),
            ..DaemonConfig::default()
        };

        let args = Args::parse_from(["guardd"]);
        assert_eq!(
            resolve_socket(&args, Some(&config)),
            PathBuf::from("/from/config.sock")
        );

        let args = Args::parse_from(["guardd", "--socket", "/from/cli.sock"]);
        assert_eq!(
            resolve_socket(&args, Some(&config)),
            PathBuf::from("/from/cli.sock")
        );
    }

    #[test]
    fn test_restart_drops_daemon_flag() {
        let args = ["start", "-d", "--init-file", "/x", "--daemon"]
            .into_iter()
            .map(OsString::from);
        assert_eq!(
            restart_args(args, Some(Path::new("/dev/pts/3"))),
            vec![
                OsString::from("start"),
                OsString::from("--init-file"),
                OsString::from("/x"),
                OsString::from("--tty"),
                OsString::from("/dev/pts/3"),
            ]
        );

        let args = ["start", "--tty", "/dev/tty1"].into_iter().map(OsString::from);
        assert_eq!(restart_args(args, Some(Path::new("/dev/tty1"))).len(), 3);
    }
}
