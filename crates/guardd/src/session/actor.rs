//! Session actor - owns the session state machine and its side effects.
//!
//! The actor is the single owner of [`SessionMachine`]. It serialises
//! everything that can change the session: client commands, user
//! activity, its own idle/lock/cycle timers and authenticator results.
//! Each input goes through the machine; the returned effects are then
//! carried out here (demo processes, authenticator child, timers).

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use guard_core::{Effect, Preferences, SessionInput, SessionMachine, SessionState, Transition, Verdict};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::commands::{ExitKind, SessionCommand, SessionEvent, SessionStatus};
use crate::auth::AuthSupervisor;
use crate::demo::DemoRunner;

/// Process-level settings the actor needs besides the preferences.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Authenticator program and leading arguments.
    pub auth_command: Vec<String>,
    /// Slack on top of `passwdTimeout` before the authenticator is killed.
    pub auth_grace: Duration,
    /// Shell that runs demo programs.
    pub shell: String,
    /// Terminal the authenticator prompts on; `None` shares the daemon's.
    pub tty: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auth_command: vec![crate::config::DEFAULT_AUTH_PROGRAM.to_string()],
            auth_grace: Duration::from_secs(5),
            shell: "/bin/sh".to_string(),
            tty: None,
        }
    }
}

#[derive(Debug, Default)]
struct Timers {
    idle: Option<Instant>,
    lock: Option<Instant>,
    cycle: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    Idle,
    Lock,
    Cycle,
}

// ============================================================================
// Session Actor
// ============================================================================

pub struct SessionActor {
    receiver: mpsc::Receiver<SessionCommand>,
    event_publisher: broadcast::Sender<SessionEvent>,
    machine: SessionMachine,
    prefs: Preferences,
    auth: AuthSupervisor,
    demos: DemoRunner,
    timers: Timers,
    changed_at: DateTime<Utc>,
    cancel: CancellationToken,
    exit: Option<ExitKind>,
}

impl SessionActor {
    pub fn new(
        receiver: mpsc::Receiver<SessionCommand>,
        event_publisher: broadcast::Sender<SessionEvent>,
        prefs: Preferences,
        settings: SessionSettings,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        let timers = Timers {
            idle: nonzero(prefs.timeout).map(|t| now + prefs.initial_delay + t),
            ..Timers::default()
        };

        Self {
            receiver,
            event_publisher,
            machine: SessionMachine::new(prefs.machine_config()),
            auth: AuthSupervisor::new(settings.auth_command, settings.auth_grace)
                .with_tty(settings.tty),
            demos: DemoRunner::new(settings.shell, &prefs),
            prefs,
            timers,
            changed_at: Utc::now(),
            cancel,
            exit: None,
        }
    }

    /// Runs until shutdown, `EXIT`/`RESTART`, or all handles are dropped.
    ///
    /// Kills and reaps any demo or authenticator child before returning.
    pub async fn run(mut self) -> ExitKind {
        info!(state = %self.machine.state(), "Session actor starting");

        while self.exit.is_none() {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.exit = Some(ExitKind::Shutdown);
                }

                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => self.exit = Some(ExitKind::Shutdown),
                },

                Some(result) = self.auth.recv() => {
                    self.apply(SessionInput::AuthFinished {
                        attempt: result.attempt,
                        outcome: result.outcome,
                    })
                    .await;
                }

                _ = wait_for(self.timers.idle) => self.fire(Timer::Idle).await,
                _ = wait_for(self.timers.lock) => self.fire(Timer::Lock).await,
                _ = wait_for(self.timers.cycle) => self.fire(Timer::Cycle).await,
            }
        }

        self.auth.shutdown().await;
        self.demos.stop().await;

        let exit = self.exit.unwrap_or_default();
        info!(?exit, "Session actor stopped");
        exit
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Apply { input, respond_to } => {
                let transition = self.apply(input).await;
                // Ignore send error - caller may have gone away
                let _ = respond_to.send(transition);
            }
            SessionCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            SessionCommand::Reload { preferences } => {
                self.reload(*preferences);
            }
            SessionCommand::Shutdown => {
                info!("Session shutdown requested");
                self.exit = Some(ExitKind::Shutdown);
            }
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    async fn apply(&mut self, input: SessionInput) -> Transition {
        let now = Instant::now();
        let demo_before = self.demos.program_number();

        let transition = self.machine.apply(input.clone(), now.into_std());

        if let Verdict::Ignored(reason) = transition.verdict {
            debug!(?input, state = %transition.from, reason = reason.describe(), "Input ignored");
        }

        for effect in &transition.effects {
            self.execute(effect, now).await;
        }

        if transition.changed_state() {
            info!(from = %transition.from, to = %transition.to, "Session state changed");
            self.changed_at = Utc::now();
            self.enter(transition.to, now);
        }

        // Unlocked always has an idle timer (unless disabled).
        if self.machine.state() == SessionState::Unlocked && self.timers.idle.is_none() {
            self.reset_idle(now);
        }

        if transition.changed_state() || self.demos.program_number() != demo_before {
            self.publish(SessionEvent::StatusChanged(self.status()));
        }

        transition
    }

    async fn execute(&mut self, effect: &Effect, now: Instant) {
        match effect {
            Effect::StopDemo => self.demos.stop().await,
            Effect::StartDemo(selection) => {
                self.demos.start(*selection).await;
            }
            Effect::SpawnAuthenticator(attempt) => {
                info!(%attempt, "Starting authenticator");
                self.auth.spawn(*attempt, self.prefs.passwd_timeout).await;
            }
            Effect::CancelAuthenticator(attempt) => {
                info!(%attempt, "Cancelling authenticator");
                self.auth.cancel(*attempt).await;
            }
            Effect::ResetIdleTimer => self.reset_idle(now),
            Effect::ArmLockTimer(grace) => {
                self.timers.lock = Some(now + *grace);
            }
            Effect::ArmCycleTimer => {
                self.timers.cycle = nonzero(self.prefs.cycle).map(|c| now + c);
            }
            Effect::Shutdown => self.request_exit(ExitKind::Shutdown),
            Effect::Restart => self.request_exit(ExitKind::Restart),
        }
    }

    /// Timer bookkeeping on entering `state`.
    fn enter(&mut self, state: SessionState, now: Instant) {
        match state {
            SessionState::Unlocked => {
                self.timers.lock = None;
                self.timers.cycle = None;
                if self.timers.idle.is_none() {
                    self.reset_idle(now);
                }
            }
            SessionState::Blanked => {
                self.timers.idle = None;
            }
            SessionState::Locked | SessionState::Authenticating => {
                self.timers.idle = None;
                self.timers.lock = None;
            }
        }
    }

    async fn fire(&mut self, timer: Timer) {
        let input = match timer {
            Timer::Idle => {
                self.timers.idle = None;
                SessionInput::IdleTimeout
            }
            Timer::Lock => {
                self.timers.lock = None;
                SessionInput::LockTimeout
            }
            Timer::Cycle => {
                self.timers.cycle = None;
                SessionInput::CycleTimeout
            }
        };
        debug!(?timer, "Timer fired");
        self.apply(input).await;
    }

    fn reset_idle(&mut self, now: Instant) {
        self.timers.idle = nonzero(self.prefs.timeout).map(|t| now + t);
    }

    fn request_exit(&mut self, kind: ExitKind) {
        info!(?kind, "Daemon exit requested");
        self.publish(SessionEvent::Exiting(kind));
        self.exit = Some(kind);
        self.cancel.cancel();
    }

    // ========================================================================
    // Preferences & status
    // ========================================================================

    fn reload(&mut self, prefs: Preferences) {
        let timeout_changed = prefs.timeout != self.prefs.timeout;

        self.machine.set_config(prefs.machine_config());
        self.demos.set_preferences(&prefs);
        self.prefs = prefs;

        if timeout_changed && self.machine.state() == SessionState::Unlocked {
            self.reset_idle(Instant::now());
        }

        info!(
            timeout_secs = self.prefs.timeout.as_secs(),
            lock = self.prefs.lock,
            mode = self.prefs.mode.name(),
            programs = self.demos.program_count(),
            "Preferences applied"
        );
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.machine.state(),
            changed_at: self.changed_at,
            demo: self.demos.program_number(),
            live_attempt: self.machine.live_attempt(),
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        if self.event_publisher.send(event).is_err() {
            debug!("No session event subscribers");
        }
    }
}

fn nonzero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

/// Sleeps until `deadline`, or forever when there is none.
async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
