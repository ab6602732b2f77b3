//! Well-known atoms.
//!
//! Atoms name root properties, client-message types and commands. Their
//! numeric ids are fixed so that every process agrees on them without a
//! round trip to the daemon.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An interned name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Atom(u32);

impl Atom {
    /// Client-message type that carries commands.
    pub const SCREENSAVER: Atom = Atom(1);
    /// Root property: `[state, changed_at, demo]`.
    pub const SCREENSAVER_STATUS: Atom = Atom(2);
    /// Root property: daemon version string.
    pub const SCREENSAVER_VERSION: Atom = Atom(3);
    /// Root property: `"<pid> (<user>@<host>)"`.
    pub const SCREENSAVER_ID: Atom = Atom(4);

    pub const ACTIVATE: Atom = Atom(10);
    pub const DEACTIVATE: Atom = Atom(11);
    pub const BLANK: Atom = Atom(12);
    pub const LOCK: Atom = Atom(13);
    pub const DEMO: Atom = Atom(14);
    pub const EXIT: Atom = Atom(15);
    pub const RESTART: Atom = Atom(16);
    pub const SELECT: Atom = Atom(17);
    pub const CYCLE: Atom = Atom(18);
    pub const NEXT: Atom = Atom(19);
    pub const PREV: Atom = Atom(20);
    /// State word published while authenticating.
    pub const AUTH: Atom = Atom(21);

    const TABLE: [(Atom, &'static str); 16] = [
        (Atom::SCREENSAVER, "SCREENSAVER"),
        (Atom::SCREENSAVER_STATUS, "_SCREENSAVER_STATUS"),
        (Atom::SCREENSAVER_VERSION, "_SCREENSAVER_VERSION"),
        (Atom::SCREENSAVER_ID, "_SCREENSAVER_ID"),
        (Atom::ACTIVATE, "ACTIVATE"),
        (Atom::DEACTIVATE, "DEACTIVATE"),
        (Atom::BLANK, "BLANK"),
        (Atom::LOCK, "LOCK"),
        (Atom::DEMO, "DEMO"),
        (Atom::EXIT, "EXIT"),
        (Atom::RESTART, "RESTART"),
        (Atom::SELECT, "SELECT"),
        (Atom::CYCLE, "CYCLE"),
        (Atom::NEXT, "NEXT"),
        (Atom::PREV, "PREV"),
        (Atom::AUTH, "AUTH"),
    ];

    /// Wraps a raw id. Unknown ids are representable; [`Atom::name`]
    /// returns `None` for them.
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }

    /// Looks up a well-known atom by name. Names are case-sensitive.
    pub fn intern(name: &str) -> Option<Atom> {
        Self::TABLE
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(atom, _)| *atom)
    }

    pub fn name(&self) -> Option<&'static str> {
        Self::TABLE
            .iter()
            .find(|(atom, _)| atom == self)
            .map(|(_, n)| *n)
    }

    /// All well-known atoms.
    pub fn all() -> impl Iterator<Item = Atom> {
        Self::TABLE.iter().map(|(atom, _)| *atom)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "atom#{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_and_names_are_unique() {
        let ids: HashSet<u32> = Atom::all().map(|a| a.id()).collect();
        let names: HashSet<&str> = Atom::all().filter_map(|a| a.name()).collect();
        assert_eq!(ids.len(), 16);
        assert_eq!(names.len(), 16);
    }

    #[test]
    fn test_intern() {
        assert_eq!(Atom::intern("_SCREENSAVER_STATUS"), Some(Atom::SCREENSAVER_STATUS));
        assert_eq!(Atom::intern("lock"), None);
        assert_eq!(Atom::from_raw(999).name(), None);
        assert_eq!(Atom::from_raw(999).to_string(), "atom#999");
    }
}
