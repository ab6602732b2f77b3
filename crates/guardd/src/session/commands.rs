//! Session actor commands, errors, and events.

use chrono::{DateTime, Utc};
use guard_core::{AttemptId, Preferences, SessionInput, SessionState, Transition};
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Session Commands
// ============================================================================

/// Commands sent to the session actor.
#[derive(Debug)]
pub enum SessionCommand {
    /// Feed one input to the state machine and run its effects.
    Apply {
        input: SessionInput,
        respond_to: oneshot::Sender<Transition>,
    },

    GetStatus {
        respond_to: oneshot::Sender<SessionStatus>,
    },

    /// Replace the preferences (boxed to keep the enum small).
    ///
    /// Fire-and-forget; sent by the preferences watcher.
    Reload { preferences: Box<Preferences> },

    /// Stop the actor without running any state transition.
    Shutdown,
}

// ============================================================================
// Session Errors
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The actor has stopped.
    #[error("session channel closed")]
    ChannelClosed,
}

// ============================================================================
// Session Events
// ============================================================================

/// Snapshot of what `_SCREENSAVER_STATUS` publishes, plus the live attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Time of the last state change.
    pub changed_at: DateTime<Utc>,
    /// Running program number, 1-based; 0 when blank or unlocked.
    pub demo: u32,
    pub live_attempt: Option<AttemptId>,
}

/// How the daemon should end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitKind {
    #[default]
    Shutdown,
    /// Re-execute the daemon binary.
    Restart,
}

/// Events published by the session actor.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The state or the running program changed.
    StatusChanged(SessionStatus),

    /// An `EXIT` or `RESTART` command was accepted.
    Exiting(ExitKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        assert_eq!(SessionError::ChannelClosed.to_string(), "session channel closed");
    }

    #[test]
    fn test_exit_kind_default() {
        assert_eq!(ExitKind::default(), ExitKind::Shutdown);
    }
}
