//! The `SCREENSAVER` client message.
//!
//! Commands travel as a format-32 client message whose type is the
//! `SCREENSAVER` atom. `data[0]` is the command atom and `data[1]` an
//! optional numeric argument (the program number for `DEMO` and `SELECT`).

use guard_core::SaverCommand;
use serde::{Deserialize, Serialize};

use crate::atom::Atom;
use crate::error::CommandError;

/// The only accepted client-message format.
pub const CLIENT_MESSAGE_FORMAT: u8 = 32;

/// A client message as sent to the root window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessageEvent {
    pub message_type: Atom,
    pub format: u8,
    pub data: Vec<i64>,
}

impl ClientMessageEvent {
    /// Builds the message for a command.
    pub fn command(cmd: SaverCommand) -> Self {
        let (atom, arg) = match cmd {
            SaverCommand::Activate => (Atom::ACTIVATE, 0),
            SaverCommand::Deactivate => (Atom::DEACTIVATE, 0),
            SaverCommand::Blank => (Atom::BLANK, 0),
            SaverCommand::Lock => (Atom::LOCK, 0),
            SaverCommand::Demo(n) => (Atom::DEMO, i64::from(n.unwrap_or(0))),
            SaverCommand::Select(n) => (Atom::SELECT, i64::from(n)),
            SaverCommand::Cycle => (Atom::CYCLE, 0),
            SaverCommand::Next => (Atom::NEXT, 0),
            SaverCommand::Prev => (Atom::PREV, 0),
            SaverCommand::Exit => (Atom::EXIT, 0),
            SaverCommand::Restart => (Atom::RESTART, 0),
        };

        Self {
            message_type: Atom::SCREENSAVER,
            format: CLIENT_MESSAGE_FORMAT,
            data: vec![i64::from(atom.id()), arg],
        }
    }

    /// Decodes the command this message carries.
    pub fn decode(&self) -> Result<SaverCommand, CommandError> {
        if self.message_type != Atom::SCREENSAVER {
            return Err(CommandError::WrongType(self.message_type));
        }
        if self.format != CLIENT_MESSAGE_FORMAT {
            return Err(CommandError::WrongFormat(self.format));
        }

        let mut words = self.data.iter().copied();
        let raw = words.next().ok_or(CommandError::Empty)?;
        let arg = words.next().unwrap_or(0);

        let command = u32::try_from(raw)
            .map(Atom::from_raw)
            .map_err(|_| CommandError::UnknownCommand(Atom::from_raw(0)))?;

        let number = |arg: i64| {
            u32::try_from(arg).map_err(|_| CommandError::BadArgument { command, arg })
        };

        match command {
            Atom::ACTIVATE => Ok(SaverCommand::Activate),
            Atom::DEACTIVATE => Ok(SaverCommand::Deactivate),
            Atom::BLANK => Ok(SaverCommand::Blank),
            Atom::LOCK => Ok(SaverCommand::Lock),
            Atom::DEMO => {
                let n = number(arg)?;
                Ok(SaverCommand::Demo((n > 0).then_some(n)))
            }
            Atom::SELECT => Ok(SaverCommand::Select(number(arg)?)),
            Atom::CYCLE => Ok(SaverCommand::Cycle),
            Atom::NEXT => Ok(SaverCommand::Next),
            Atom::PREV => Ok(SaverCommand::Prev),
            Atom::EXIT => Ok(SaverCommand::Exit),
            Atom::RESTART => Ok(SaverCommand::Restart),
            other => Err(CommandError::UnknownCommand(other)),
        }
    }
}
