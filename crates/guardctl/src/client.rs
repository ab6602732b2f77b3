//! Display-socket client.
//!
//! One [`GuardClient`] is one connection: it performs the `Connect`
//! handshake, then issues requests and waits for their replies. After
//! [`GuardClient::subscribe`] the daemon also pushes `PropertyNotify`
//! lines, which [`GuardClient::next_change`] returns in order.
//!
//! **Panic-Free Policy:** no `.unwrap()`, `.expect()` or `panic!()`.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use guard_core::SaverCommand;
use guard_protocol::{
    Atom, ClientMessage, ClientMessageEvent, CommandResult, DaemonMessage, PropertyValue,
    ProtocolVersion, ScreensaverId, StatusProperty,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ClientError, Result};

/// How long a request waits for its reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// A root property change pushed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub atom: Atom,
    pub value: PropertyValue,
}

pub struct GuardClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    client_id: String,
    reply_timeout: Duration,
    /// Notifications that arrived while waiting for a reply.
    pending: VecDeque<Change>,
}

impl GuardClient {
    /// Connects to the daemon at `socket_path` and completes the handshake.
    ///
    /// # Errors
    ///
    /// `ClientError::NotRunning` when nothing exists at the path;
    /// `ClientError::Rejected` when the daemon refuses the handshake.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        if !socket_path.exists() {
            return Err(ClientError::NotRunning {
                path: socket_path.to_path_buf(),
            });
        }

        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(ClientError::Connection)?;
        let (reader, writer) = stream.into_split();

        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            client_id: String::new(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            pending: VecDeque::new(),
        };
        client.handshake().await?;
        Ok(client)
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn handshake(&mut self) -> Result<()> {
        self.send(&ClientMessage::connect(None)).await?;

        match self.recv_reply().await? {
            DaemonMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !protocol_version.is_compatible_with(&ProtocolVersion::CURRENT) {
                    return Err(ClientError::VersionMismatch {
                        client: ProtocolVersion::CURRENT,
                        daemon: protocol_version,
                    });
                }
                debug!(client_id = %client_id, "Connected to daemon");
                self.client_id = client_id;
                Ok(())
            }
            DaemonMessage::Rejected {
                reason,
                protocol_version,
            } => {
                if protocol_version.is_compatible_with(&ProtocolVersion::CURRENT) {
                    Err(ClientError::Rejected(reason))
                } else {
                    Err(ClientError::VersionMismatch {
                        client: ProtocolVersion::CURRENT,
                        daemon: protocol_version,
                    })
                }
            }
            other => Err(unexpected("Connected", &other)),
        }
    }

    /// Reads a root property. `None` when it is unset.
    pub async fn get_property(&mut self, atom: Atom) -> Result<Option<PropertyValue>> {
        self.send(&ClientMessage::get_property(atom)).await?;

        match self.recv_reply().await? {
            DaemonMessage::Property { atom: got, value } if got == atom => Ok(value),
            other => Err(unexpected("Property", &other)),
        }
    }

    /// Reads and decodes `_SCREENSAVER_STATUS`.
    pub async fn status(&mut self) -> Result<StatusProperty> {
        let value = self
            .get_property(Atom::SCREENSAVER_STATUS)
            .await?
            .ok_or_else(|| ClientError::Protocol("_SCREENSAVER_STATUS is not set".into()))?;
        Ok(StatusProperty::from_value(&value)?)
    }

    /// `_SCREENSAVER_VERSION` and the parsed `_SCREENSAVER_ID`, if set.
    pub async fn version(&mut self) -> Result<(String, Option<ScreensaverId>)> {
        let version = match self.get_property(Atom::SCREENSAVER_VERSION).await? {
            Some(PropertyValue::String(s)) => s,
            Some(_) => return Err(ClientError::Protocol("_SCREENSAVER_VERSION is not a string".into())),
            None => String::from("unknown"),
        };
        let id = match self.get_property(Atom::SCREENSAVER_ID).await? {
            Some(PropertyValue::String(s)) => s.parse().ok(),
            _ => None,
        };
        Ok((version, id))
    }

    /// Sends a `SCREENSAVER` client message carrying `command`.
    pub async fn send_command(&mut self, command: SaverCommand) -> Result<CommandResult> {
        let event = ClientMessageEvent::command(command);
        self.send(&ClientMessage::send_event(event)).await?;

        match self.recv_reply().await? {
            DaemonMessage::CommandAck { result, .. } => Ok(result),
            other => Err(unexpected("CommandAck", &other)),
        }
    }

    /// Starts `PropertyNotify` delivery. The daemon first replays the
    /// current value of every property.
    pub async fn subscribe(&mut self) -> Result<()> {
        self.send(&ClientMessage::subscribe()).await
    }

    /// Waits for the next property change. No timeout.
    pub async fn next_change(&mut self) -> Result<Change> {
        if let Some(change) = self.pending.pop_front() {
            return Ok(change);
        }
        loop {
            match self.recv().await? {
                DaemonMessage::PropertyNotify { atom, value } => return Ok(Change { atom, value }),
                DaemonMessage::Error { message, code } => {
                    return Err(ClientError::Daemon { message, code })
                }
                other => debug!(?other, "Ignoring unsolicited message"),
            }
        }
    }

    /// Says goodbye. Errors are ignored; the connection is closing anyway.
    pub async fn disconnect(mut self) {
        let _ = self.send(&ClientMessage::disconnect()).await;
    }

    async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<DaemonMessage> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(&line)?)
    }

    /// The next message that is not a notification, within the reply
    /// timeout. Daemon errors become `ClientError::Daemon`.
    async fn recv_reply(&mut self) -> Result<DaemonMessage> {
        let limit = self.reply_timeout;
        let reply = timeout(limit, async {
            loop {
                match self.recv().await? {
                    DaemonMessage::PropertyNotify { atom, value } => {
                        self.pending.push_back(Change { atom, value });
                    }
                    other => return Ok::<_, ClientError>(other),
                }
            }
        })
        .await
        .map_err(|_| ClientError::Timeout)??;

        match reply {
            DaemonMessage::Error { message, code } => Err(ClientError::Daemon { message, code }),
            other => Ok(other),
        }
    }
}

fn unexpected(wanted: &str, got: &DaemonMessage) -> ClientError {
    ClientError::Protocol(format!("expected {wanted}, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Accepts one connection and answers each line with the next canned reply.
    async fn fake_daemon(listener: UnixListener, replies: Vec<DaemonMessage>) -> Vec<ClientMessage> {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut seen = Vec::new();

        for reply in replies {
            let Some(line) = lines.next_line().await.unwrap() else {
                break;
            };
            seen.push(serde_json::from_str(&line).unwrap());
            let json = serde_json::to_string(&reply).unwrap();
            writer.write_all(json.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
        }
        seen
    }

    #[tokio::test]
    async fn test_missing_socket_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let result = GuardClient::connect(&dir.path().join("nope.sock")).await;
        assert!(matches!(result, Err(ClientError::NotRunning { .. })));
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let daemon = tokio::spawn(fake_daemon(
            listener,
            vec![
                DaemonMessage::connected("client-0".into()),
                DaemonMessage::command_ack("LOCK", CommandResult::Accepted),
            ],
        ));

        let mut client = GuardClient::connect(&path).await.unwrap();
        assert_eq!(client.client_id(), "client-0");
        let result = client.send_command(SaverCommand::Lock).await.unwrap();
        assert_eq!(result, CommandResult::Accepted);

        let seen = daemon.await.unwrap();
        match &seen[1].message {
            guard_protocol::MessageType::SendEvent { event } => {
                assert_eq!(event.decode().unwrap(), SaverCommand::Lock);
            }
            other => panic!("Expected SendEvent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(fake_daemon(
            listener,
            vec![DaemonMessage::Rejected {
                reason: "go away".into(),
                protocol_version: ProtocolVersion::new(7, 0),
            }],
        ));

        let result = GuardClient::connect(&path).await;
        assert!(matches!(result, Err(ClientError::VersionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_daemon_error_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(fake_daemon(
            listener,
            vec![
                DaemonMessage::connected("client-0".into()),
                DaemonMessage::error_with_code("nope", "bad_command"),
            ],
        ));

        let mut client = GuardClient::connect(&path).await.unwrap();
        match client.send_command(SaverCommand::Cycle).await {
            Err(ClientError::Daemon { code, .. }) => assert_eq!(code.as_deref(), Some("bad_command")),
            other => panic!("Expected Daemon error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silent_daemon_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();

        // Accepts but never answers.
        let _daemon = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(stream);
        });

        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut client = GuardClient {
            reader: BufReader::new(reader),
            writer,
            client_id: "x".into(),
            reply_timeout: Duration::from_millis(100),
            pending: VecDeque::new(),
        };
        assert!(matches!(client.status().await, Err(ClientError::Timeout)));
    }
}
