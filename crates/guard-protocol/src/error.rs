//! Protocol errors.

use thiserror::Error;

use crate::atom::Atom;

/// A root property could not be read, written or decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("no such property: {0}")]
    NotFound(Atom),

    /// Only the daemon writes root properties.
    #[error("property {0} is read-only for clients")]
    ReadOnly(Atom),

    #[error("property {atom} has the wrong type (expected {expected})")]
    WrongType { atom: Atom, expected: &'static str },

    #[error("property {atom} is malformed: {reason}")]
    Malformed { atom: Atom, reason: String },
}

/// A `ClientMessage` could not be turned into a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognised ClientMessage type {0}")]
    WrongType(Atom),

    #[error("ClientMessage format {0} is not 32")]
    WrongFormat(u8),

    #[error("ClientMessage carries no data")]
    Empty,

    #[error("unrecognised command {0}")]
    UnknownCommand(Atom),

    #[error("bad argument {arg} for {command}")]
    BadArgument { command: Atom, arg: i64 },
}
