//! Session state of the guarded display.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;

/// The state of the guarded session.
///
/// Owned exclusively by the daemon's session actor. Everyone else sees
/// it through the `_SCREENSAVER_STATUS` root property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Display visible, idle timer running.
    #[default]
    Unlocked,

    /// Display blanked (demo running or plain black), not locked.
    Blanked,

    /// Display blanked and locked; input starts authentication.
    Locked,

    /// An authenticator attempt is live.
    Authenticating,
}

impl SessionState {
    /// Returns true while the display is covered.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Unlocked)
    }

    /// Returns true if unlocking requires authentication.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked | Self::Authenticating)
    }

    /// Returns true if demo selection commands are honoured.
    ///
    /// Locking disables demo switching.
    pub fn allows_demo_switching(&self) -> bool {
        !self.is_locked()
    }

    /// Returns the lowercase label used in logs and `guardctl status`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Blanked => "blanked",
            Self::Locked => "locked",
            Self::Authenticating => "authenticating",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SessionState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unlocked" => Ok(Self::Unlocked),
            "blanked" => Ok(Self::Blanked),
            "locked" => Ok(Self::Locked),
            "authenticating" => Ok(Self::Authenticating),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_predicates() {
        assert!(!SessionState::Unlocked.is_active());
        assert!(SessionState::Blanked.is_active());
        assert!(!SessionState::Blanked.is_locked());
        assert!(SessionState::Locked.is_locked());
        assert!(SessionState::Authenticating.is_locked());
        assert!(!SessionState::Locked.allows_demo_switching());
        assert!(SessionState::Blanked.allows_demo_switching());
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!("LOCKED".parse::<SessionState>().unwrap(), SessionState::Locked);
        assert!("sleeping".parse::<SessionState>().is_err());
    }

    #[test]
    fn test_state_serde_snake_case() {
        let json = serde_json::to_string(&SessionState::Authenticating).unwrap();
        assert_eq!(json, "\"authenticating\"");
    }
}
