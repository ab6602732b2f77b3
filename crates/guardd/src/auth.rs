//! Supervision of the authenticator child process.
//!
//! At most one child runs at a time. Each child gets the attempt id it
//! was spawned for; its result comes back on [`AuthSupervisor::recv`]
//! tagged with that id so the session can drop stale results.
//!
//! A child is always reaped: on normal exit, on timeout and on cancel
//! the task waits for it before reporting.
//!
//! The child prompts on a terminal. A daemonized `guardd` has none of its
//! own, so the terminal captured at startup is opened for the child's
//! stdin and stderr; stdout always carries the report back.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use guard_auth::{AuthReport, EXIT_SUCCESS};
use guard_core::{AttemptId, AttemptOutcome};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on what is read from the child's stdout.
const MAX_REPORT_BYTES: u64 = 64 * 1024;

/// A finished attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub attempt: AttemptId,
    pub outcome: AttemptOutcome,
}

struct LiveChild {
    attempt: AttemptId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct AuthSupervisor {
    /// Program followed by its fixed arguments.
    command: Vec<String>,
    grace: Duration,
    /// Terminal for the child's prompt; `None` shares ours.
    tty: Option<PathBuf>,
    live: Option<LiveChild>,
    results_tx: mpsc::UnboundedSender<AuthResult>,
    results_rx: mpsc::UnboundedReceiver<AuthResult>,
}

impl AuthSupervisor {
    pub fn new(command: Vec<String>, grace: Duration) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            command,
            grace,
            tty: None,
            live: None,
            results_tx,
            results_rx,
        }
    }

    pub fn with_tty(mut self, tty: Option<PathBuf>) -> Self {
        self.tty = tty;
        self
    }

    /// The attempt whose child is running, if any.
    pub fn live_attempt(&self) -> Option<AttemptId> {
        self.live.as_ref().map(|l| l.attempt)
    }

    /// Starts the authenticator for `attempt`.
    ///
    /// The child is killed if it outlives `passwd_timeout` plus the
    /// configured grace; the attempt then resolves to `TimedOut`.
    pub async fn spawn(&mut self, attempt: AttemptId, passwd_timeout: Duration) {
        if let Some(previous) = self.live.as_ref().map(|l| l.attempt) {
            warn!(%previous, %attempt, "Authenticator still running; cancelling it");
            self.cancel(previous).await;
        }

        let cancel = CancellationToken::new();
        let limit = passwd_timeout + self.grace;
        let command = self.command.clone();
        let tty = self.tty.clone();
        let results = self.results_tx.clone();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let outcome = run_child(&command, tty.as_deref(), passwd_timeout, limit, token).await;
            info!(%attempt, outcome = outcome.label(), "Authenticator finished");
            let _ = results.send(AuthResult { attempt, outcome });
        });

        self.live = Some(LiveChild {
            attempt,
            cancel,
            task,
        });
    }

    /// Kills the child for `attempt` and waits until it is reaped.
    ///
    /// The `Cancelled` result still arrives through [`recv`](Self::recv).
    pub async fn cancel(&mut self, attempt: AttemptId) {
        let Some(live) = self.live.take() else {
            return;
        };
        if live.attempt != attempt {
            debug!(%attempt, live = %live.attempt, "Cancel for a stale attempt");
            self.live = Some(live);
            return;
        }

        live.cancel.cancel();
        if let Err(e) = live.task.await {
            warn!(%attempt, error = %e, "Authenticator task failed");
        }
    }

    /// Next finished attempt. Pending forever while nothing is running.
    pub async fn recv(&mut self) -> Option<AuthResult> {
        let result = self.results_rx.recv().await?;
        if self.live.as_ref().is_some_and(|l| l.attempt == result.attempt) {
            self.live = None;
        }
        Some(result)
    }

    /// Cancels whatever is running. Used on daemon shutdown.
    pub async fn shutdown(&mut self) {
        if let Some(attempt) = self.live_attempt() {
            self.cancel(attempt).await;
        }
    }
}

enum Ending {
    Exited(std::io::Result<(ExitStatus, String)>),
    TimedOut,
    Cancelled,
}

/// The child's stdin and stderr: the given terminal, or ours.
fn terminal_stdio(tty: Option<&Path>) -> std::io::Result<(Stdio, Stdio)> {
    let Some(path) = tty else {
        return Ok((Stdio::inherit(), Stdio::inherit()));
    };
    let terminal = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)?;
    Ok((Stdio::from(terminal.try_clone()?), Stdio::from(terminal)))
}

async fn run_child(
    command: &[String],
    tty: Option<&Path>,
    passwd_timeout: Duration,
    limit: Duration,
    cancel: CancellationToken,
) -> AttemptOutcome {
    let Some((program, args)) = command.split_first() else {
        warn!("No authenticator command configured");
        return AttemptOutcome::failure();
    };

    let (stdin, stderr) = match terminal_stdio(tty) {
        Ok(pair) => pair,
        Err(e) => {
            let tty = tty.map(|p| p.display().to_string()).unwrap_or_default();
            warn!(%tty, error = %e, "Cannot open terminal for the authenticator");
            return AttemptOutcome::failure();
        }
    };

    let mut child = match Command::new(program)
        .args(args)
        .arg("--timeout")
        .arg(passwd_timeout.as_secs().max(1).to_string())
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(stderr)
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!(program = %program, error = %e, "Failed to start authenticator");
            return AttemptOutcome::failure();
        }
    };
    debug!(pid = ?child.id(), program = %program, "Authenticator started");

    let ending = {
        let finished = collect(&mut child);
        tokio::select! {
            result = finished => Ending::Exited(result),
            _ = tokio::time::sleep(limit) => Ending::TimedOut,
            _ = cancel.cancelled() => Ending::Cancelled,
        }
    };

    match ending {
        Ending::Exited(Ok((status, stdout))) => interpret(status, &stdout),
        Ending::Exited(Err(e)) => {
            warn!(error = %e, "Lost track of the authenticator");
            reap(&mut child).await;
            AttemptOutcome::failure()
        }
        Ending::TimedOut => {
            warn!(limit_secs = limit.as_secs(), "Authenticator timed out; killing it");
            reap(&mut child).await;
            AttemptOutcome::TimedOut
        }
        Ending::Cancelled => {
            debug!("Authenticator cancelled; killing it");
            reap(&mut child).await;
            AttemptOutcome::Cancelled
        }
    }
}

/// Reads the child's stdout to the end, then waits for it.
async fn collect(child: &mut Child) -> std::io::Result<(ExitStatus, String)> {
    let mut stdout = String::new();
    if let Some(pipe) = child.stdout.take() {
        pipe.take(MAX_REPORT_BYTES).read_to_string(&mut stdout).await?;
    }
    let status = child.wait().await?;
    Ok((status, stdout))
}

async fn reap(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Authenticator already gone");
    }
}

/// Exit status decides success; the report only refines failures.
fn interpret(status: ExitStatus, stdout: &str) -> AttemptOutcome {
    let report = AuthReport::from_output(stdout);

    if status.code() == Some(EXIT_SUCCESS) {
        if report.as_ref().is_some_and(|r| !r.outcome.is_success()) {
            warn!("Authenticator exited 200 but reported a failure");
            return AttemptOutcome::failure();
        }
        return AttemptOutcome::Success;
    }

    match report.map(|r| r.outcome) {
        Some(AttemptOutcome::Success) | None => {
            debug!(status = ?status.code(), "Authenticator did not succeed");
            AttemptOutcome::failure()
        }
        Some(outcome) => outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    fn exited(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    #[test]
    fn test_interpret_exit_codes() {
        assert_eq!(interpret(exited(200), ""), AttemptOutcome::Success);
        assert_eq!(interpret(exited(255), ""), AttemptOutcome::failure());
        assert_eq!(interpret(exited(1), ""), AttemptOutcome::failure());
    }

    #[test]
    fn test_interpret_uses_report_for_failures() {
        let line = serde_json::to_string(&AuthReport::new(AttemptOutcome::TimedOut, None)).unwrap();
        assert_eq!(interpret(exited(255), &line), AttemptOutcome::TimedOut);

        // A report claiming success does not override the exit status.
        let line = serde_json::to_string(&AuthReport::new(AttemptOutcome::Success, None)).unwrap();
        assert_eq!(interpret(exited(255), &line), AttemptOutcome::failure());

        let line = serde_json::to_string(&AuthReport::new(AttemptOutcome::Cancelled, None)).unwrap();
        assert_eq!(interpret(exited(200), &line), AttemptOutcome::failure());
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into(), "guard-auth".into()]
    }

    #[tokio::test]
    async fn test_success_child() {
        let mut supervisor = AuthSupervisor::new(sh("exit 200"), Duration::from_secs(5));
        supervisor.spawn(AttemptId::new(1), Duration::from_secs(5)).await;
        let result = supervisor.recv().await.unwrap();
        assert_eq!(result.attempt, AttemptId::new(1));
        assert_eq!(result.outcome, AttemptOutcome::Success);
        assert_eq!(supervisor.live_attempt(), None);
    }

    /// A child that records its pid, then sleeps in place of the shell.
    fn sleeper(pid_file: &Path) -> Vec<String> {
        sh(&format!("echo $$ > '{}'; exec sleep 30", pid_file.display()))
    }

    async fn recorded_pid(pid_file: &Path) -> libc::pid_t {
        for _ in 0..100 {
            if let Ok(pid) = std::fs::read_to_string(pid_file).unwrap_or_default().trim().parse() {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("child never wrote {}", pid_file.display());
    }

    fn assert_gone(pid: libc::pid_t) {
        // SAFETY: signal 0 only checks that the process exists.
        let rc = unsafe { libc::kill(pid, 0) };
        let errno = std::io::Error::last_os_error().raw_os_error();
        assert_eq!((rc, errno), (-1, Some(libc::ESRCH)), "pid {pid} still exists");
    }

    #[tokio::test]
    async fn test_slow_child_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let mut supervisor = AuthSupervisor::new(sleeper(&pid_file), Duration::ZERO);
        supervisor.spawn(AttemptId::new(7), Duration::from_secs(1)).await;

        let pid = recorded_pid(&pid_file).await;
        let result = supervisor.recv().await.unwrap();
        assert_eq!(result.outcome, AttemptOutcome::TimedOut);
        assert_gone(pid);
    }

    #[tokio::test]
    async fn test_cancel_reaps_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let mut supervisor = AuthSupervisor::new(sleeper(&pid_file), Duration::from_secs(5));
        supervisor.spawn(AttemptId::new(2), Duration::from_secs(30)).await;
        let pid = recorded_pid(&pid_file).await;

        // Stale ids are ignored.
        supervisor.cancel(AttemptId::new(1)).await;
        assert_eq!(supervisor.live_attempt(), Some(AttemptId::new(2)));

        supervisor.cancel(AttemptId::new(2)).await;
        assert_eq!(supervisor.live_attempt(), None);
        assert_gone(pid);
        let result = supervisor.recv().await.unwrap();
        assert_eq!(result.outcome, AttemptOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_child_prompts_on_configured_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let tty = dir.path().join("tty");
        std::fs::write(&tty, "typed\n").unwrap();

        let script = "read line; echo \"got $line\" >&2; exit 200";
        let mut supervisor =
            AuthSupervisor::new(sh(script), Duration::from_secs(5)).with_tty(Some(tty.clone()));
        supervisor.spawn(AttemptId::new(4), Duration::from_secs(5)).await;

        assert_eq!(supervisor.recv().await.unwrap().outcome, AttemptOutcome::Success);
        assert!(std::fs::read_to_string(&tty).unwrap().contains("got typed"));
    }

    #[tokio::test]
    async fn test_unopenable_terminal_fails_attempt() {
        let mut supervisor = AuthSupervisor::new(sh("exit 200"), Duration::from_secs(5))
            .with_tty(Some(PathBuf::from("/nonexistent/tty")));
        supervisor.spawn(AttemptId::new(5), Duration::from_secs(5)).await;
        assert_eq!(supervisor.recv().await.unwrap().outcome, AttemptOutcome::failure());
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let mut supervisor = AuthSupervisor::new(
            vec!["/nonexistent/guard-auth".into()],
            Duration::from_secs(1),
        );
        supervisor.spawn(AttemptId::new(3), Duration::from_secs(1)).await;
        assert_eq!(supervisor.recv().await.unwrap().outcome, AttemptOutcome::failure());
    }
}
