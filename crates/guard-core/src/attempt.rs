//! Authentication attempt identity and outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The only failure reason ever shown to the user.
///
/// Backends never get to say *why* a credential was rejected, so an
/// unknown user and a wrong password look identical from outside.
pub const GENERIC_FAILURE: &str = "Authentication failed";

/// Identifier of one authentication attempt.
///
/// Monotonic per daemon run. Results carrying a stale id are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(u64);

impl AttemptId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Returns the id following this one.
    #[must_use]
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

/// Terminal result of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Credentials verified; the session may unlock.
    Success,

    /// Credentials rejected or backend error.
    Failure {
        /// Human-readable, deliberately generic.
        reason: String,
    },

    /// The user stopped typing for longer than `passwdTimeout`.
    TimedOut,

    /// The user (or the daemon) cancelled the conversation.
    Cancelled,
}

impl AttemptOutcome {
    /// Creates the generic failure outcome.
    pub fn failure() -> Self {
        Self::Failure {
            reason: GENERIC_FAILURE.to_string(),
        }
    }

    /// Returns true only for `Success`. Everything else keeps the lock.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure { .. } => "failure",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }

    /// Message shown on the lock surface after a failed attempt.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Failure { reason } => Some(reason.as_str()),
            Self::TimedOut => Some("Timed out!"),
            Self::Cancelled => None,
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_success_unlocks() {
        assert!(AttemptOutcome::Success.is_success());
        assert!(!AttemptOutcome::failure().is_success());
        assert!(!AttemptOutcome::TimedOut.is_success());
        assert!(!AttemptOutcome::Cancelled.is_success());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&AttemptOutcome::TimedOut).unwrap();
        assert_eq!(json, r#"{"result":"timed_out"}"#);

        let parsed: AttemptOutcome =
            serde_json::from_str(r#"{"result":"failure","reason":"Authentication failed"}"#).unwrap();
        assert_eq!(parsed, AttemptOutcome::failure());
    }

    #[test]
    fn test_attempt_id_next() {
        let id = AttemptId::new(7);
        assert_eq!(id.next().get(), 8);
        assert_eq!(id.to_string(), "attempt-7");
    }
}
