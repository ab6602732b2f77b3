//! `guard-auth` command line.
//!
//! Exit status is 200 when the user authenticated and 255 for every
//! other outcome. `--splash` and `--init` exit 0 on success. Before
//! exiting, one JSON [`AuthReport`] line is written to stdout.
//!
//! Arguments are parsed before the privilege drop: they pick the user and
//! the backends whose initialization needs the privileges. In a setuid
//! run the caller's `RUST_LOG` is ignored.

use std::ffi::CStr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use guard_core::AttemptOutcome;
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;

use crate::authenticator::Authenticator;
use crate::backend::{self, AuthBackend, FileBackend};
use crate::error::AuthError;
use crate::privilege::{Elevated, PrivilegeGuard};
use crate::report::{AuthReport, EXIT_FAILURE};
use crate::surface::TerminalSurface;

/// saverguard authenticator
#[derive(Parser, Debug)]
#[command(name = "guard-auth", version, about)]
pub struct Args {
    /// Display the surface belongs to (logged; the terminal surface ignores it)
    #[arg(long)]
    pub display: Option<String>,

    /// More logging; repeat for more (-v, -vv, -vvv, -vvvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Synchronous display mode (accepted for compatibility and logged)
    #[arg(long)]
    pub sync: bool,

    /// Show the version banner and exit
    #[arg(long)]
    pub splash: bool,

    /// Initialize the backend, drop privileges and exit
    #[arg(long)]
    pub init: bool,

    /// Maximum logging
    #[arg(long)]
    pub debug: bool,

    /// User to authenticate (only root may name another user)
    #[arg(long)]
    pub user: Option<String>,

    /// Backends to try, in order (helper, file, pam)
    #[arg(long, value_delimiter = ',')]
    pub backend: Vec<String>,

    /// Credential file for the `file` backend
    #[arg(long)]
    pub passwd_file: Option<PathBuf>,

    /// Seconds of inactivity before the prompt gives up
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

impl Args {
    fn log_level(&self) -> Level {
        if self.debug {
            return Level::TRACE;
        }
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

/// Parses arguments, runs, and returns the process exit status.
pub fn main() -> i32 {
    // Captured before anything else runs.
    let guard = PrivilegeGuard::acquire();
    let args = Args::parse();
    init_logging(&args, honors_env(&guard));

    match run(args, guard) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Authenticator failed");
            print_report(&AuthReport::new(AttemptOutcome::failure(), None));
            EXIT_FAILURE
        }
    }
}

/// Whether the environment may configure logging: not when it belongs
/// to a less privileged caller.
fn honors_env(guard: &PrivilegeGuard<Elevated>) -> bool {
    !guard.ids().is_setid()
}

fn log_filter(level: Level, from_env: bool) -> EnvFilter {
    let mut filter = if from_env {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::default()
    };
    for krate in ["guard_auth", "guard_core"] {
        if let Ok(directive) = format!("{krate}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

fn init_logging(args: &Args, from_env: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(args.log_level(), from_env))
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(args: Args, guard: PrivilegeGuard<Elevated>) -> Result<i32> {
    if let Some(dpy) = &args.display {
        debug!(display = %dpy, sync = args.sync, "Display");
    }

    if args.splash {
        let _dropped = guard.drop_privileges().context("Failed to drop privileges")?;
        eprintln!("saverguard {}", env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }

    let user = resolve_user(&guard, args.user.as_deref())?;
    let backends = build_backends(&args)?;
    let mut authenticator = Authenticator::new(backends, Duration::from_secs(args.timeout));

    let handle = match authenticator.begin_attempt(&user, &guard) {
        Ok(handle) => handle,
        Err(e @ AuthError::BackendUnavailable { .. }) => {
            error!(error = %e, "Screen stays locked");
            print_report(&AuthReport::new(AttemptOutcome::failure(), None));
            return Ok(EXIT_FAILURE);
        }
        Err(e) => return Err(e.into()),
    };
    let backend_name = handle.backend_name();

    // Nothing below this line runs with privileges.
    let dropped = guard.drop_privileges().context("Failed to drop privileges")?;

    if args.init {
        info!(backend = backend_name, "Initialization check passed");
        return Ok(0);
    }

    let host = hostname();
    let outcome = {
        let mut surface = TerminalSurface::new(&dropped, &format!("{user}@{host}"))
            .context("Failed to open prompt surface")?;
        authenticator.run(handle, &mut surface)?
    };

    let report = AuthReport::new(outcome, Some(backend_name));
    print_report(&report);
    Ok(report.exit_code())
}

fn build_backends(args: &Args) -> Result<Vec<Box<dyn AuthBackend>>> {
    let with_file_override = |b: Box<dyn AuthBackend>| -> Box<dyn AuthBackend> {
        match (&args.passwd_file, b.name()) {
            (Some(path), backend::file::NAME) => Box::new(FileBackend::new(path)),
            _ => b,
        }
    };

    if args.backend.is_empty() {
        return Ok(backend::default_chain().into_iter().map(with_file_override).collect());
    }

    args.backend
        .iter()
        .map(|name| backend::by_name(name).map(with_file_override))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("known backends: {}", backend::BACKEND_NAMES.join(", ")))
}

/// The real user, or `requested` when running as root.
fn resolve_user(guard: &PrivilegeGuard<Elevated>, requested: Option<&str>) -> Result<String> {
    let uid = guard.ids().uid;
    let real = user_name(uid).context("Cannot determine the current user")?;
    match requested {
        Some(name) if name != real && uid != 0 => {
            bail!("only root may authenticate a different user")
        }
        Some(name) => Ok(name.to_string()),
        None => Ok(real),
    }
}

fn user_name(uid: u32) -> Option<String> {
    // SAFETY: getpwuid returns a pointer into static storage or null; the
    // name is copied out before any other libc call.
    unsafe {
        let pw = libc::getpwuid(uid);
        if pw.is_null() || (*pw).pw_name.is_null() {
            return None;
        }
        Some(CStr::from_ptr((*pw).pw_name).to_string_lossy().into_owned())
    }
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for its full length.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    CStr::from_bytes_until_nul(&buf)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

fn print_report(report: &AuthReport) {
    use std::io::Write;
    if let Ok(line) = serde_json::to_string(report) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        let parse = |argv: &[&str]| Args::parse_from(std::iter::once("guard-auth").chain(argv.iter().copied()));
        assert_eq!(parse(&[]).log_level(), Level::WARN);
        assert_eq!(parse(&["-v"]).log_level(), Level::INFO);
        assert_eq!(parse(&["-vv"]).log_level(), Level::DEBUG);
        assert_eq!(parse(&["-vvvv"]).log_level(), Level::TRACE);
        assert_eq!(parse(&["--debug"]).log_level(), Level::TRACE);
    }

    #[test]
    fn test_filter_without_env_has_only_our_directives() {
        let filter = log_filter(Level::DEBUG, false).to_string();
        assert!(filter.contains("guard_auth=debug"), "{filter}");
        assert!(filter.contains("guard_core=debug"), "{filter}");
        assert_eq!(filter.split(',').count(), 2, "{filter}");
    }

    #[test]
    fn test_plain_run_honors_env() {
        // Test binaries are never setuid.
        assert!(honors_env(&PrivilegeGuard::acquire()));
    }

    #[test]
    fn test_backend_list_parsing() {
        let args = Args::parse_from(["guard-auth", "--backend", "file,helper", "--timeout", "5"]);
        assert_eq!(args.backend, vec!["file", "helper"]);
        assert_eq!(args.timeout, 5);
        assert!(build_backends(&args).is_ok());

        let args = Args::parse_from(["guard-auth", "--backend", "kerberos"]);
        assert!(build_backends(&args).is_err());
    }

    #[test]
    fn test_passwd_file_override() {
        let args = Args::parse_from(["guard-auth", "--backend", "file", "--passwd-file", "/tmp/x"]);
        let backends = build_backends(&args).unwrap();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].name(), "file");
    }
}
