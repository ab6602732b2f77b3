//! saverguard protocol - the root-window property protocol
//!
//! This crate defines how cooperating processes talk to the session
//! daemon: the well-known atoms, the `SCREENSAVER` client message that
//! carries commands, the encoding of the root properties the daemon
//! publishes, and the newline-delimited JSON messages exchanged over the
//! daemon's display socket.

pub mod atom;
pub mod command;
pub mod error;
pub mod message;
pub mod property;
pub mod socket;
pub mod version;

pub use atom::Atom;
pub use command::{ClientMessageEvent, CLIENT_MESSAGE_FORMAT};
pub use error::{CommandError, PropertyError};
pub use message::{ClientMessage, CommandResult, DaemonMessage, MessageType};
pub use property::{PropertyValue, ScreensaverId, StatusProperty};
pub use socket::{default_socket_path, SOCKET_ENV};
pub use version::{ProtocolVersion, VersionError};
