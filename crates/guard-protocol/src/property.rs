//! Root property values and the encodings of the well-known ones.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use guard_core::SessionState;
use serde::{Deserialize, Serialize};

use crate::atom::Atom;
use crate::error::PropertyError;

/// The value stored under a root property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Integer(Vec<i64>),
    String(String),
}

impl PropertyValue {
    pub fn as_integers(&self) -> Option<&[i64]> {
        match self {
            Self::Integer(words) => Some(words),
            Self::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Integer(_) => None,
        }
    }
}

// ============================================================================
// _SCREENSAVER_STATUS
// ============================================================================

/// Decoded `_SCREENSAVER_STATUS`.
///
/// Encoded as three integers: the state word (0 when unlocked, else the
/// `BLANK`, `LOCK` or `AUTH` atom id), the unix time of the last state
/// change, and the running program number (1-based, 0 for none).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusProperty {
    pub state: SessionState,
    pub changed_at: DateTime<Utc>,
    pub demo: u32,
}

impl StatusProperty {
    pub fn new(state: SessionState, changed_at: DateTime<Utc>, demo: u32) -> Self {
        Self {
            state,
            changed_at,
            demo,
        }
    }

    fn state_word(state: SessionState) -> i64 {
        let atom = match state {
            SessionState::Unlocked => return 0,
            SessionState::Blanked => Atom::BLANK,
            SessionState::Locked => Atom::LOCK,
            SessionState::Authenticating => Atom::AUTH,
        };
        i64::from(atom.id())
    }

    pub fn to_value(&self) -> PropertyValue {
        PropertyValue::Integer(vec![
            Self::state_word(self.state),
            self.changed_at.timestamp(),
            i64::from(self.demo),
        ])
    }

    pub fn from_value(value: &PropertyValue) -> Result<Self, PropertyError> {
        let atom = Atom::SCREENSAVER_STATUS;
        let words = value.as_integers().ok_or(PropertyError::WrongType {
            atom,
            expected: "INTEGER",
        })?;

        let [state, changed_at, demo] = words else {
            return Err(PropertyError::Malformed {
                atom,
                reason: format!("expected 3 words, got {}", words.len()),
            });
        };

        let state = match *state {
            0 => SessionState::Unlocked,
            w if w == i64::from(Atom::BLANK.id()) => SessionState::Blanked,
            w if w == i64::from(Atom::LOCK.id()) => SessionState::Locked,
            w if w == i64::from(Atom::AUTH.id()) => SessionState::Authenticating,
            other => {
                return Err(PropertyError::Malformed {
                    atom,
                    reason: format!("unknown state word {other}"),
                })
            }
        };

        let changed_at = Utc
            .timestamp_opt(*changed_at, 0)
            .single()
            .ok_or_else(|| PropertyError::Malformed {
                atom,
                reason: format!("bad timestamp {changed_at}"),
            })?;

        let demo = u32::try_from(*demo).map_err(|_| PropertyError::Malformed {
            atom,
            reason: format!("bad program number {demo}"),
        })?;

        Ok(Self {
            state,
            changed_at,
            demo,
        })
    }
}

// ============================================================================
// _SCREENSAVER_ID
// ============================================================================

/// Decoded `_SCREENSAVER_ID`: `"<pid> (<user>@<host>)"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreensaverId {
    pub pid: u32,
    pub user: String,
    pub host: String,
}

impl fmt::Display for ScreensaverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}@{})", self.pid, self.user, self.host)
    }
}

impl FromStr for ScreensaverId {
    type Err = PropertyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PropertyError::Malformed {
            atom: Atom::SCREENSAVER_ID,
            reason: format!("cannot parse {s:?}"),
        };

        let (pid, rest) = s.trim().split_once(' ').ok_or_else(malformed)?;
        let pid = pid.parse().map_err(|_| malformed())?;
        let inner = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(malformed)?;
        let (user, host) = inner.split_once('@').ok_or_else(malformed)?;

        Ok(Self {
            pid,
            user: user.to_string(),
            host: host.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_words() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let status = StatusProperty::new(SessionState::Locked, at, 3);
        let value = status.to_value();
        assert_eq!(
            value,
            PropertyValue::Integer(vec![i64::from(Atom::LOCK.id()), 1_700_000_000, 3])
        );
        assert_eq!(StatusProperty::from_value(&value).unwrap(), status);

        let unlocked = StatusProperty::new(SessionState::Unlocked, at, 0).to_value();
        assert_eq!(unlocked.as_integers().unwrap()[0], 0);
    }

    #[test]
    fn test_status_rejects_bad_shapes() {
        let err = StatusProperty::from_value(&PropertyValue::String("x".into())).unwrap_err();
        assert!(matches!(err, PropertyError::WrongType { .. }));

        let err = StatusProperty::from_value(&PropertyValue::Integer(vec![0, 0])).unwrap_err();
        assert!(matches!(err, PropertyError::Malformed { .. }));

        let err = StatusProperty::from_value(&PropertyValue::Integer(vec![77, 0, 0])).unwrap_err();
        assert!(matches!(err, PropertyError::Malformed { .. }));
    }

    #[test]
    fn test_screensaver_id_format() {
        let id = ScreensaverId {
            pid: 4242,
            user: "alice".into(),
            host: "box".into(),
        };
        assert_eq!(id.to_string(), "4242 (alice@box)");
        assert_eq!("4242 (alice@box)".parse::<ScreensaverId>().unwrap(), id);
        assert!("alice@box".parse::<ScreensaverId>().is_err());
    }

    #[test]
    fn test_value_serialization() {
        let json = serde_json::to_string(&PropertyValue::String("0.3.0".into())).unwrap();
        assert_eq!(json, r#"{"type":"string","value":"0.3.0"}"#);
    }
}
