//! Translation between our fixed atom ids and a server's interned ones.

use std::os::raw::{c_long, c_ulong};

use guard_protocol::{Atom, ClientMessageEvent, PropertyValue};

use crate::root::PropertyChange;

/// Which window a root property lives on when mirrored to X.
///
/// Clients find the daemon by the version and id properties on its own
/// window; the status goes on the real root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Root,
    Owner,
}

/// A property write ready for `XChangeProperty`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XProperty {
    Integers(Vec<c_long>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XWrite {
    pub target: Target,
    pub property: c_ulong,
    pub value: XProperty,
}

/// Our atoms paired with the server's ids for the same names.
#[derive(Debug, Clone, Default)]
pub struct AtomMap {
    pairs: Vec<(Atom, c_ulong)>,
}

impl AtomMap {
    /// Interns every well-known name through `intern`. Names the server
    /// refuses are left out.
    pub fn new(mut intern: impl FnMut(&'static str) -> Option<c_ulong>) -> Self {
        let pairs = Atom::all()
            .filter_map(|atom| {
                let name = atom.name()?;
                intern(name).filter(|id| *id != 0).map(|id| (atom, id))
            })
            .collect();
        Self { pairs }
    }

    pub fn to_x(&self, atom: Atom) -> Option<c_ulong> {
        self.pairs.iter().find(|(a, _)| *a == atom).map(|(_, id)| *id)
    }

    pub fn from_x(&self, id: c_ulong) -> Option<Atom> {
        self.pairs.iter().find(|(_, x)| *x == id).map(|(a, _)| *a)
    }

    /// How a root property change looks on the X server. `None` for
    /// properties that have no X counterpart.
    pub fn export(&self, change: &PropertyChange) -> Option<XWrite> {
        let property = self.to_x(change.atom)?;
        let target = match change.atom {
            Atom::SCREENSAVER_STATUS => Target::Root,
            Atom::SCREENSAVER_VERSION | Atom::SCREENSAVER_ID => Target::Owner,
            _ => return None,
        };

        let value = match &change.value {
            PropertyValue::String(text) => XProperty::Text(text.clone()),
            PropertyValue::Integer(words) => {
                let mut out = Vec::with_capacity(words.len());
                for (i, word) in words.iter().enumerate() {
                    // The status state word is an atom; the rest are plain numbers.
                    let word = if i == 0 && change.atom == Atom::SCREENSAVER_STATUS && *word != 0 {
                        let ours = Atom::from_raw(u32::try_from(*word).ok()?);
                        c_long::try_from(self.to_x(ours)?).ok()?
                    } else {
                        c_long::try_from(*word).ok()?
                    };
                    out.push(word);
                }
                XProperty::Integers(out)
            }
        };

        Some(XWrite {
            target,
            property,
            value,
        })
    }

    /// Turns an X `ClientMessage` into the event our decoder reads.
    ///
    /// Returns `None` for messages of any type but `SCREENSAVER`. A
    /// command atom we do not know stays unknown, so decoding reports it.
    pub fn import(&self, message_type: c_ulong, format: i32, data: &[c_long]) -> Option<ClientMessageEvent> {
        if self.from_x(message_type)? != Atom::SCREENSAVER {
            return None;
        }

        let mut words = data.iter().copied();
        let command = words
            .next()
            .and_then(|w| c_ulong::try_from(w).ok())
            .and_then(|w| self.from_x(w))
            .map_or(0, |atom| i64::from(atom.id()));

        let mut out = vec![command];
        out.extend(words.map(i64::from));

        Some(ClientMessageEvent {
            message_type: Atom::SCREENSAVER,
            format: u8::try_from(format).unwrap_or(0),
            data: out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use guard_core::{SaverCommand, SessionState};
    use guard_protocol::{CommandError, StatusProperty};

    /// A server whose ids are ours plus 300.
    fn shifted() -> AtomMap {
        AtomMap::new(|name| Atom::intern(name).map(|a| c_ulong::from(a.id()) + 300))
    }

    #[test]
    fn test_map_both_ways() {
        let map = shifted();
        assert_eq!(map.to_x(Atom::LOCK), Some(313));
        assert_eq!(map.from_x(313), Some(Atom::LOCK));
        assert_eq!(map.from_x(5), None);
    }

    #[test]
    fn test_refused_names_are_skipped() {
        let map = AtomMap::new(|name| (name != "LOCK").then_some(1000 + name.len() as c_ulong));
        assert_eq!(map.to_x(Atom::LOCK), None);
        assert!(map.to_x(Atom::BLANK).is_some());
    }

    #[test]
    fn test_lock_message_decodes() {
        let map = shifted();
        let event = map.import(301, 32, &[313, 0, 0, 0, 0]).unwrap();
        assert_eq!(event.decode().unwrap(), SaverCommand::Lock);

        let event = map.import(301, 32, &[317, 4, 0, 0, 0]).unwrap();
        assert_eq!(event.decode().unwrap(), SaverCommand::Select(4));
    }

    #[test]
    fn test_foreign_messages_are_not_ours() {
        let map = shifted();
        assert!(map.import(77, 32, &[313]).is_none());
        // A known atom that is not the command type.
        assert!(map.import(313, 32, &[313]).is_none());
    }

    #[test]
    fn test_unknown_command_atom_is_reported() {
        let map = shifted();
        let event = map.import(301, 32, &[9999, 0]).unwrap();
        assert!(matches!(event.decode(), Err(CommandError::UnknownCommand(_))));

        let event = map.import(301, 8, &[313]).unwrap();
        assert!(matches!(event.decode(), Err(CommandError::WrongFormat(8))));
    }

    #[test]
    fn test_status_state_word_uses_server_atom() {
        let map = shifted();
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let change = PropertyChange {
            atom: Atom::SCREENSAVER_STATUS,
            value: StatusProperty::new(SessionState::Locked, at, 3).to_value(),
        };

        let write = map.export(&change).unwrap();
        assert_eq!(write.target, Target::Root);
        assert_eq!(write.property, 302);
        assert_eq!(write.value, XProperty::Integers(vec![313, 1_700_000_000, 3]));

        let unlocked = PropertyChange {
            atom: Atom::SCREENSAVER_STATUS,
            value: StatusProperty::new(SessionState::Unlocked, at, 0).to_value(),
        };
        assert_eq!(
            map.export(&unlocked).unwrap().value,
            XProperty::Integers(vec![0, 1_700_000_000, 0])
        );
    }

    #[test]
    fn test_identity_goes_on_owner_window() {
        let map = shifted();
        let change = PropertyChange {
            atom: Atom::SCREENSAVER_VERSION,
            value: PropertyValue::String("0.3.0".into()),
        };
        let write = map.export(&change).unwrap();
        assert_eq!(write.target, Target::Owner);
        assert_eq!(write.value, XProperty::Text("0.3.0".into()));

        let other = PropertyChange {
            atom: Atom::from_raw(999),
            value: PropertyValue::Integer(vec![1]),
        };
        assert!(map.export(&other).is_none());
    }
}
