//! Wire messages exchanged over the display socket.
//!
//! Each message is one JSON object on its own line.

use guard_core::IgnoreReason;
use serde::{Deserialize, Serialize};

use crate::atom::Atom;
use crate::command::ClientMessageEvent;
use crate::property::PropertyValue;
use crate::version::ProtocolVersion;

/// Requests a client can make.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Handshake; must be the first message on a connection.
    Connect {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Look up a well-known atom by name.
    InternAtom { name: String },

    /// Read one root property.
    GetProperty { atom: Atom },

    /// Attempt to write a root property. Always rejected.
    ChangeProperty { atom: Atom, value: PropertyValue },

    /// Deliver a client message to the root window.
    SendEvent { event: ClientMessageEvent },

    /// Receive `PropertyNotify` for every root property change.
    Subscribe,

    Unsubscribe,

    Ping { seq: u64 },

    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub protocol_version: ProtocolVersion,

    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn intern_atom(name: &str) -> Self {
        Self::new(MessageType::InternAtom {
            name: name.to_string(),
        })
    }

    pub fn get_property(atom: Atom) -> Self {
        Self::new(MessageType::GetProperty { atom })
    }

    pub fn change_property(atom: Atom, value: PropertyValue) -> Self {
        Self::new(MessageType::ChangeProperty { atom, value })
    }

    pub fn send_event(event: ClientMessageEvent) -> Self {
        Self::new(MessageType::SendEvent { event })
    }

    pub fn subscribe() -> Self {
        Self::new(MessageType::Subscribe)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// How the daemon disposed of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandResult {
    Accepted,
    Ignored { reason: IgnoreReason },
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    Connected {
        protocol_version: ProtocolVersion,
        client_id: String,
    },

    /// Handshake refused (version mismatch, missing handshake).
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    AtomInterned {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        atom: Option<Atom>,
    },

    /// Reply to `GetProperty`; `value` is absent when the property is unset.
    Property {
        atom: Atom,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<PropertyValue>,
    },

    /// A root property changed.
    PropertyNotify { atom: Atom, value: PropertyValue },

    /// Reply to `SendEvent`.
    CommandAck {
        command: String,
        #[serde(flatten)]
        result: CommandResult,
    },

    Pong { seq: u64 },

    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn property(atom: Atom, value: Option<PropertyValue>) -> Self {
        Self::Property { atom, value }
    }

    pub fn property_notify(atom: Atom, value: PropertyValue) -> Self {
        Self::PropertyNotify { atom, value }
    }

    pub fn command_ack(command: &str, result: CommandResult) -> Self {
        Self::CommandAck {
            command: command.to_string(),
            result,
        }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_core::SaverCommand;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::ping(42);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"seq\":42"));
        assert!(json.contains("\"protocol_version\""));
    }

    #[test]
    fn test_send_event_roundtrip() {
        let original = ClientMessage::send_event(ClientMessageEvent::command(SaverCommand::Select(2)));
        let json = serde_json::to_string(&original).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();

        match parsed.message {
            MessageType::SendEvent { event } => {
                assert_eq!(event.decode(), Ok(SaverCommand::Select(2)));
            }
            other => panic!("expected SendEvent, got {other:?}"),
        }
    }

    #[test]
    fn test_command_ack_flattens_result() {
        let msg = DaemonMessage::command_ack(
            "SELECT",
            CommandResult::Ignored {
                reason: IgnoreReason::DemoSwitchingLocked,
            },
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"command_ack\""));
        assert!(json.contains("\"result\":\"ignored\""));
        assert!(json.contains("\"reason\":\"demo_switching_locked\""));

        let parsed: DaemonMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            parsed,
            DaemonMessage::CommandAck {
                result: CommandResult::Ignored { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_unset_property_omits_value() {
        let json = serde_json::to_string(&DaemonMessage::property(Atom::SCREENSAVER_ID, None)).unwrap();
        assert!(!json.contains("value"));
    }
}
