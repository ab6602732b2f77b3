//! The session state machine.
//!
//! [`SessionMachine`] is a pure transition function: it owns the current
//! [`SessionState`], takes one [`SessionInput`] at a time and returns a
//! [`Transition`] describing the new state and the side effects the
//! daemon must carry out. It never touches a clock, a process or a
//! socket itself, which keeps every rule below testable in isolation.
//!
//! # Rules
//!
//! - Only an `AuthFinished` carrying the live attempt id and a `Success`
//!   outcome leaves `Authenticating` for `Unlocked`.
//! - At most one attempt is live; input during `Authenticating` is
//!   swallowed.
//! - Demo switching is refused while locked, except `CYCLE`.
//! - `EXIT` and `RESTART` are refused while locked.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attempt::{AttemptId, AttemptOutcome};
use crate::prefs::SaverMode;
use crate::state::SessionState;

// ============================================================================
// Inputs
// ============================================================================

/// A command delivered through the `SCREENSAVER` client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "arg", rename_all = "snake_case")]
pub enum SaverCommand {
    /// Blank now, as if the idle timer had fired.
    Activate,
    /// Pretend the user did something.
    Deactivate,
    /// Blank without running a demo.
    Blank,
    /// Lock now, without a grace period.
    Lock,
    /// Run a demo; `Some(n)` picks the n-th program (1-based).
    Demo(Option<u32>),
    /// Switch to the n-th program (1-based).
    Select(u32),
    /// Switch to another demo now.
    Cycle,
    Next,
    Prev,
    /// Stop the daemon.
    Exit,
    /// Re-exec the daemon.
    Restart,
}

impl SaverCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Activate => "ACTIVATE",
            Self::Deactivate => "DEACTIVATE",
            Self::Blank => "BLANK",
            Self::Lock => "LOCK",
            Self::Demo(_) => "DEMO",
            Self::Select(_) => "SELECT",
            Self::Cycle => "CYCLE",
            Self::Next => "NEXT",
            Self::Prev => "PREV",
            Self::Exit => "EXIT",
            Self::Restart => "RESTART",
        }
    }
}

/// Everything that can drive the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// The idle timer expired.
    IdleTimeout,
    /// The lock grace period after blanking expired.
    LockTimeout,
    /// The demo cycle timer expired.
    CycleTimeout,
    /// Keyboard or pointer activity.
    UserActivity,
    Command(SaverCommand),
    /// The authenticator for `attempt` exited.
    AuthFinished {
        attempt: AttemptId,
        outcome: AttemptOutcome,
    },
    /// Abort the live attempt (daemon shutdown, surface closed).
    CancelAuthentication,
}

// ============================================================================
// Outputs
// ============================================================================

/// Which demo to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum DemoSelection {
    /// A random enabled program.
    Random,
    /// The program at this zero-based index.
    Index(usize),
    /// The program after the current one.
    Next,
    /// The program before the current one.
    Prev,
    /// No program; plain black.
    Blank,
}

/// A side effect requested by a transition, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Stop the running demo, if any.
    StopDemo,
    /// Stop the running demo and start this one.
    StartDemo(DemoSelection),
    SpawnAuthenticator(AttemptId),
    /// Kill and reap the authenticator for this attempt.
    CancelAuthenticator(AttemptId),
    ResetIdleTimer,
    /// Arm the lock grace timer.
    ArmLockTimer(Duration),
    ArmCycleTimer,
    Shutdown,
    Restart,
}

/// Why an input was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The screen is not blanked.
    NotActive,
    /// The requested state is the current one.
    AlreadyInState,
    /// Demo switching is disabled while locked.
    DemoSwitchingLocked,
    /// This command is refused while locked.
    LockedOut,
    /// An attempt is already live.
    AuthenticationInProgress,
    /// The result belongs to an attempt that is no longer live.
    StaleAttempt,
    /// Idle blanking is disabled.
    ModeOff,
    /// Locking is disabled in the preferences.
    LockDisabled,
    /// Program numbers start at 1.
    InvalidArgument,
}

impl IgnoreReason {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::NotActive => "screen saver is not active",
            Self::AlreadyInState => "already in that state",
            Self::DemoSwitchingLocked => "demo switching is disabled while locked",
            Self::LockedOut => "not allowed while locked",
            Self::AuthenticationInProgress => "authentication in progress",
            Self::StaleAttempt => "stale authentication result",
            Self::ModeOff => "blanking is disabled",
            Self::LockDisabled => "locking is disabled",
            Self::InvalidArgument => "program numbers start at 1",
        }
    }
}

/// Whether an input changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Applied,
    Ignored(IgnoreReason),
}

/// The result of feeding one input to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub effects: Vec<Effect>,
    pub verdict: Verdict,
}

impl Transition {
    fn ignored(state: SessionState, reason: IgnoreReason) -> Self {
        Self {
            from: state,
            to: state,
            effects: Vec::new(),
            verdict: Verdict::Ignored(reason),
        }
    }

    pub fn is_applied(&self) -> bool {
        self.verdict == Verdict::Applied
    }

    /// True when the state itself changed.
    pub fn changed_state(&self) -> bool {
        self.from != self.to
    }
}

// ============================================================================
// Machine
// ============================================================================

/// The preference subset that shapes transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    pub lock: bool,
    pub lock_timeout: Duration,
    pub mode: SaverMode,
    /// Zero-based program index used in `one` mode.
    pub selected: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            lock: false,
            lock_timeout: Duration::ZERO,
            mode: SaverMode::Random,
            selected: 0,
        }
    }
}

/// The session state machine.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    config: MachineConfig,
    blanked_at: Option<Instant>,
    live_attempt: Option<AttemptId>,
    next_attempt: AttemptId,
}

impl SessionMachine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            state: SessionState::Unlocked,
            config,
            blanked_at: None,
            live_attempt: None,
            next_attempt: AttemptId::new(1),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Replaces the configuration; takes effect on the next input.
    pub fn set_config(&mut self, config: MachineConfig) {
        self.config = config;
    }

    /// The attempt currently allowed to finish, if any.
    pub fn live_attempt(&self) -> Option<AttemptId> {
        self.live_attempt
    }

    pub fn blanked_at(&self) -> Option<Instant> {
        self.blanked_at
    }

    /// Applies one input at time `now`.
    pub fn apply(&mut self, input: SessionInput, now: Instant) -> Transition {
        let from = self.state;
        let transition = match from {
            SessionState::Unlocked => self.on_unlocked(input, now),
            SessionState::Blanked => self.on_blanked(input, now),
            SessionState::Locked => self.on_locked(input),
            SessionState::Authenticating => self.on_authenticating(input),
        };

        self.state = transition.to;
        if !self.state.is_active() {
            self.blanked_at = None;
        }

        if transition.changed_state() {
            debug!(from = %transition.from, to = %transition.to, "Session state changed");
        }
        transition
    }

    // ------------------------------------------------------------------------
    // Per-state handlers
    // ------------------------------------------------------------------------

    fn on_unlocked(&mut self, input: SessionInput, now: Instant) -> Transition {
        let state = SessionState::Unlocked;
        match input {
            SessionInput::IdleTimeout => {
                if self.config.mode == SaverMode::Off {
                    return Transition::ignored(state, IgnoreReason::ModeOff);
                }
                let selection = self.configured_selection();
                self.activate(now, selection, false)
            }
            SessionInput::UserActivity => reset_idle(),
            SessionInput::Command(cmd) => match cmd {
                SaverCommand::Deactivate => reset_idle(),
                SaverCommand::Activate => {
                    let selection = self.configured_selection();
                    self.activate(now, selection, false)
                }
                SaverCommand::Blank => self.activate(now, DemoSelection::Blank, false),
                SaverCommand::Lock => {
                    let selection = self.configured_selection();
                    self.activate(now, selection, true)
                }
                SaverCommand::Demo(n) => match demo_index(n) {
                    Ok(Some(index)) => self.activate(now, DemoSelection::Index(index), false),
                    Ok(None) => {
                        let selection = self.configured_selection();
                        self.activate(now, selection, false)
                    }
                    Err(reason) => Transition::ignored(state, reason),
                },
                SaverCommand::Select(n) => match demo_index(Some(n)) {
                    Ok(Some(index)) => self.activate(now, DemoSelection::Index(index), false),
                    _ => Transition::ignored(state, IgnoreReason::InvalidArgument),
                },
                SaverCommand::Next => self.activate(now, DemoSelection::Next, false),
                SaverCommand::Prev => self.activate(now, DemoSelection::Prev, false),
                SaverCommand::Cycle => Transition::ignored(state, IgnoreReason::NotActive),
                SaverCommand::Exit => Transition {
                    from: state,
                    to: state,
                    effects: vec![Effect::Shutdown],
                    verdict: Verdict::Applied,
                },
                SaverCommand::Restart => Transition {
                    from: state,
                    to: state,
                    effects: vec![Effect::Restart],
                    verdict: Verdict::Applied,
                },
            },
            SessionInput::LockTimeout | SessionInput::CycleTimeout => {
                Transition::ignored(state, IgnoreReason::NotActive)
            }
            SessionInput::AuthFinished { .. } => {
                Transition::ignored(state, IgnoreReason::StaleAttempt)
            }
            SessionInput::CancelAuthentication => {
                Transition::ignored(state, IgnoreReason::NotActive)
            }
        }
    }

    fn on_blanked(&mut self, input: SessionInput, now: Instant) -> Transition {
        let state = SessionState::Blanked;
        match input {
            SessionInput::UserActivity => self.wake(now),
            SessionInput::LockTimeout => {
                if !self.config.lock {
                    return Transition::ignored(state, IgnoreReason::LockDisabled);
                }
                Transition {
                    from: state,
                    to: SessionState::Locked,
                    effects: Vec::new(),
                    verdict: Verdict::Applied,
                }
            }
            SessionInput::CycleTimeout => self.cycle(state),
            SessionInput::IdleTimeout => Transition::ignored(state, IgnoreReason::AlreadyInState),
            SessionInput::Command(cmd) => match cmd {
                SaverCommand::Deactivate => self.wake(now),
                SaverCommand::Cycle => self.cycle(state),
                SaverCommand::Activate | SaverCommand::Blank => {
                    Transition::ignored(state, IgnoreReason::AlreadyInState)
                }
                SaverCommand::Lock => Transition {
                    from: state,
                    to: SessionState::Locked,
                    effects: Vec::new(),
                    verdict: Verdict::Applied,
                },
                SaverCommand::Demo(n) => match demo_index(n) {
                    Ok(Some(index)) => self.switch_demo(state, DemoSelection::Index(index)),
                    Ok(None) => self.switch_demo(state, self.configured_selection()),
                    Err(reason) => Transition::ignored(state, reason),
                },
                SaverCommand::Select(n) => match demo_index(Some(n)) {
                    Ok(Some(index)) => self.switch_demo(state, DemoSelection::Index(index)),
                    _ => Transition::ignored(state, IgnoreReason::InvalidArgument),
                },
                SaverCommand::Next => self.switch_demo(state, DemoSelection::Next),
                SaverCommand::Prev => self.switch_demo(state, DemoSelection::Prev),
                SaverCommand::Exit => Transition {
                    from: state,
                    to: SessionState::Unlocked,
                    effects: vec![Effect::StopDemo, Effect::Shutdown],
                    verdict: Verdict::Applied,
                },
                SaverCommand::Restart => Transition {
                    from: state,
                    to: SessionState::Unlocked,
                    effects: vec![Effect::StopDemo, Effect::Restart],
                    verdict: Verdict::Applied,
                },
            },
            SessionInput::AuthFinished { .. } => {
                Transition::ignored(state, IgnoreReason::StaleAttempt)
            }
            SessionInput::CancelAuthentication => {
                Transition::ignored(state, IgnoreReason::AlreadyInState)
            }
        }
    }

    fn on_locked(&mut self, input: SessionInput) -> Transition {
        let state = SessionState::Locked;
        match input {
            SessionInput::UserActivity | SessionInput::Command(SaverCommand::Deactivate) => {
                self.begin_attempt(state)
            }
            SessionInput::CycleTimeout | SessionInput::Command(SaverCommand::Cycle) => {
                self.cycle(state)
            }
            SessionInput::Command(
                SaverCommand::Demo(_)
                | SaverCommand::Select(_)
                | SaverCommand::Next
                | SaverCommand::Prev,
            ) => Transition::ignored(state, IgnoreReason::DemoSwitchingLocked),
            SessionInput::Command(SaverCommand::Exit | SaverCommand::Restart) => {
                Transition::ignored(state, IgnoreReason::LockedOut)
            }
            SessionInput::Command(
                SaverCommand::Activate | SaverCommand::Blank | SaverCommand::Lock,
            )
            | SessionInput::IdleTimeout
            | SessionInput::LockTimeout => {
                Transition::ignored(state, IgnoreReason::AlreadyInState)
            }
            SessionInput::AuthFinished { .. } => {
                Transition::ignored(state, IgnoreReason::StaleAttempt)
            }
            SessionInput::CancelAuthentication => {
                Transition::ignored(state, IgnoreReason::AlreadyInState)
            }
        }
    }

    fn on_authenticating(&mut self, input: SessionInput) -> Transition {
        let state = SessionState::Authenticating;
        match input {
            SessionInput::AuthFinished { attempt, outcome } => {
                if self.live_attempt != Some(attempt) {
                    return Transition::ignored(state, IgnoreReason::StaleAttempt);
                }
                self.live_attempt = None;

                if outcome.is_success() {
                    Transition {
                        from: state,
                        to: SessionState::Unlocked,
                        effects: vec![Effect::StopDemo, Effect::ResetIdleTimer],
                        verdict: Verdict::Applied,
                    }
                } else {
                    Transition {
                        from: state,
                        to: SessionState::Locked,
                        effects: Vec::new(),
                        verdict: Verdict::Applied,
                    }
                }
            }
            SessionInput::CancelAuthentication => match self.live_attempt {
                Some(id) => Transition {
                    from: state,
                    to: state,
                    effects: vec![Effect::CancelAuthenticator(id)],
                    verdict: Verdict::Applied,
                },
                None => Transition::ignored(state, IgnoreReason::StaleAttempt),
            },
            // No switch under the prompt, but the schedule survives the attempt.
            SessionInput::CycleTimeout => Transition {
                from: state,
                to: state,
                effects: vec![Effect::ArmCycleTimer],
                verdict: Verdict::Applied,
            },
            SessionInput::Command(
                SaverCommand::Demo(_)
                | SaverCommand::Select(_)
                | SaverCommand::Next
                | SaverCommand::Prev,
            ) => Transition::ignored(state, IgnoreReason::DemoSwitchingLocked),
            SessionInput::Command(SaverCommand::Exit | SaverCommand::Restart) => {
                Transition::ignored(state, IgnoreReason::LockedOut)
            }
            _ => Transition::ignored(state, IgnoreReason::AuthenticationInProgress),
        }
    }

    // ------------------------------------------------------------------------
    // Shared steps
    // ------------------------------------------------------------------------

    /// Unlocked -> Blanked (or straight to Locked).
    fn activate(&mut self, now: Instant, selection: DemoSelection, force_lock: bool) -> Transition {
        self.blanked_at = Some(now);

        let mut effects = vec![Effect::StartDemo(selection)];
        if selection != DemoSelection::Blank {
            effects.push(Effect::ArmCycleTimer);
        }

        let lock_now =
            force_lock || (self.config.lock && self.config.lock_timeout.is_zero());
        let to = if lock_now {
            SessionState::Locked
        } else {
            if self.config.lock {
                effects.push(Effect::ArmLockTimer(self.config.lock_timeout));
            }
            SessionState::Blanked
        };

        Transition {
            from: SessionState::Unlocked,
            to,
            effects,
            verdict: Verdict::Applied,
        }
    }

    /// Input while blanked: unblank, or authenticate once the grace
    /// period is over.
    fn wake(&mut self, now: Instant) -> Transition {
        if self.grace_expired(now) {
            return self.begin_attempt(SessionState::Blanked);
        }
        Transition {
            from: SessionState::Blanked,
            to: SessionState::Unlocked,
            effects: vec![Effect::StopDemo, Effect::ResetIdleTimer],
            verdict: Verdict::Applied,
        }
    }

    fn begin_attempt(&mut self, from: SessionState) -> Transition {
        let id = self.next_attempt;
        self.next_attempt = id.next();
        self.live_attempt = Some(id);

        Transition {
            from,
            to: SessionState::Authenticating,
            effects: vec![Effect::SpawnAuthenticator(id)],
            verdict: Verdict::Applied,
        }
    }

    fn cycle(&self, state: SessionState) -> Transition {
        let selection = match self.config.mode {
            SaverMode::Random => DemoSelection::Random,
            SaverMode::One | SaverMode::Blank | SaverMode::Off => {
                return Transition {
                    from: state,
                    to: state,
                    effects: vec![Effect::ArmCycleTimer],
                    verdict: Verdict::Applied,
                };
            }
        };
        self.switch_demo(state, selection)
    }

    fn switch_demo(&self, state: SessionState, selection: DemoSelection) -> Transition {
        Transition {
            from: state,
            to: state,
            effects: vec![Effect::StartDemo(selection), Effect::ArmCycleTimer],
            verdict: Verdict::Applied,
        }
    }

    fn grace_expired(&self, now: Instant) -> bool {
        if !self.config.lock {
            return false;
        }
        match self.blanked_at {
            Some(at) => now.saturating_duration_since(at) >= self.config.lock_timeout,
            None => false,
        }
    }

    fn configured_selection(&self) -> DemoSelection {
        match self.config.mode {
            SaverMode::Random => DemoSelection::Random,
            SaverMode::One => DemoSelection::Index(self.config.selected),
            SaverMode::Blank | SaverMode::Off => DemoSelection::Blank,
        }
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}

/// Converts a 1-based program number into an index.
fn demo_index(n: Option<u32>) -> Result<Option<usize>, IgnoreReason> {
    match n {
        None => Ok(None),
        Some(0) => Err(IgnoreReason::InvalidArgument),
        Some(n) => Ok(Some(n as usize - 1)),
    }
}

fn reset_idle() -> Transition {
    Transition {
        from: SessionState::Unlocked,
        to: SessionState::Unlocked,
        effects: vec![Effect::ResetIdleTimer],
        verdict: Verdict::Applied,
    }
}
