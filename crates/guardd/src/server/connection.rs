//! Connection handler for individual display clients.
//!
//! Each connection performs the `Connect` handshake, then serves atom
//! lookups, property reads and `SendEvent` commands. Commands go to the
//! session actor; the reply says whether the command was accepted or
//! why it was ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use guard_protocol::{
    Atom, ClientMessage, ClientMessageEvent, CommandResult, DaemonMessage, MessageType, ProtocolVersion,
};
use guard_core::Verdict;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::MAX_SUBSCRIBERS;
use crate::root::RootWindow;
use crate::session::SessionHandle;

pub type SubscriberWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Subscribed clients keyed by client id.
pub type SubscribersMap = Arc<RwLock<HashMap<String, SubscriberWriter>>>;

/// Maximum message size (64 KiB)
const MAX_MESSAGE_SIZE: usize = 65_536;

/// Idle connections are dropped after this long.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type ClientId = String;

pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: SubscriberWriter,
    session: SessionHandle,
    root: RootWindow,
    subscribers: SubscribersMap,
    client_id: Option<ClientId>,
    subscribed: bool,
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        session: SessionHandle,
        root: RootWindow,
        subscribers: SubscribersMap,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            session,
            root,
            subscribers,
            client_id: None,
            subscribed: false,
            connection_number,
        }
    }

    /// Serves the connection. Once it closes, returns the client id if the
    /// client was still subscribed, so the server can drop its writer.
    pub async fn run(mut self) -> Option<ClientId> {
        debug!(connection = self.connection_number, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(connection = self.connection_number, error = %e, "Handshake failed");
            return None;
        }
        debug!(client_id = ?self.client_id, "Client handshake completed");

        if let Err(e) = self.process_messages().await {
            debug!(client_id = ?self.client_id, error = %e, "Connection closed");
        }

        debug!(client_id = ?self.client_id, "Client disconnected");
        self.client_id.filter(|_| self.subscribed)
    }

    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = self.read_message().await?;

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(DaemonMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(assigned_id)).await
            }
            other => {
                self.send_message(DaemonMessage::rejected("Expected Connect message for handshake"))
                    .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => return Ok(()),
                Ok(Err(e @ ConnectionError::ParseError(_))) => {
                    // Malformed line: report it and keep the connection.
                    self.send_message(DaemonMessage::error_with_code(&e.to_string(), "parse_error"))
                        .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ConnectionError::Timeout),
            };

            match self.handle_message(msg).await {
                Ok(()) => {}
                Err(ConnectionError::Eof) => return Ok(()),
                Err(e) => {
                    warn!(client_id = ?self.client_id, error = %e, "Error handling message");
                    let _ = self.send_message(DaemonMessage::error(&e.to_string())).await;
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(DaemonMessage::error("Already connected")).await?;
            }

            MessageType::InternAtom { name } => {
                let atom = Atom::intern(&name);
                self.send_message(DaemonMessage::AtomInterned { name, atom }).await?;
            }

            MessageType::GetProperty { atom } => {
                let value = self.root.get(atom).await;
                self.send_message(DaemonMessage::property(atom, value)).await?;
            }

            MessageType::ChangeProperty { atom, .. } => {
                let err = self.root.refuse_client_write(atom);
                warn!(client_id = ?self.client_id, %atom, "Client tried to write a root property");
                self.send_message(DaemonMessage::error_with_code(&err.to_string(), "read_only"))
                    .await?;
            }

            MessageType::SendEvent { event } => {
                self.handle_send_event(event).await?;
            }

            MessageType::Subscribe => self.handle_subscribe().await?,

            MessageType::Unsubscribe => {
                if let Some(ref client_id) = self.client_id {
                    self.subscribers.write().await.remove(client_id);
                }
                self.subscribed = false;
                debug!(client_id = ?self.client_id, "Client unsubscribed");
            }

            MessageType::Ping { seq } => {
                self.send_message(DaemonMessage::pong(seq)).await?;
            }

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    async fn handle_send_event(&mut self, event: ClientMessageEvent) -> Result<(), ConnectionError> {
        let command = match event.decode() {
            Ok(command) => command,
            Err(e) => {
                warn!(client_id = ?self.client_id, error = %e, "Rejected client message");
                return self
                    .send_message(DaemonMessage::error_with_code(&e.to_string(), "bad_command"))
                    .await;
            }
        };

        let transition = self
            .session
            .command(command)
            .await
            .map_err(|e| ConnectionError::Session(e.to_string()))?;

        let result = command_result(transition.verdict);
        info!(
            client_id = ?self.client_id,
            command = command.name(),
            accepted = transition.is_applied(),
            state = %transition.to,
            "Command received"
        );

        self.send_message(DaemonMessage::command_ack(command.name(), result)).await
    }

    async fn handle_subscribe(&mut self) -> Result<(), ConnectionError> {
        let Some(client_id) = self.client_id.clone() else {
            return self
                .send_message(DaemonMessage::error("Must connect before subscribing"))
                .await;
        };

        {
            let mut subs = self.subscribers.write().await;
            if subs.len() >= MAX_SUBSCRIBERS && !subs.contains_key(&client_id) {
                drop(subs);
                return self
                    .send_message(DaemonMessage::error(&format!(
                        "Too many subscribers (max: {MAX_SUBSCRIBERS})"
                    )))
                    .await;
            }
            subs.insert(client_id.clone(), Arc::clone(&self.writer));
        }
        self.subscribed = true;
        debug!(client_id = %client_id, "Client subscribed to property changes");

        // Current values first, as if each had just changed.
        for change in self.root.snapshot().await {
            self.send_message(DaemonMessage::property_notify(change.atom, change.value))
                .await?;
        }
        Ok(())
    }

    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        // One byte past the limit is enough to tell an oversized line.
        let bytes_read = (&mut self.reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        serde_json::from_str(&line).map_err(|e| ConnectionError::ParseError(e.to_string()))
    }

    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        let mut writer = self.writer.lock().await;

        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

fn command_result(verdict: Verdict) -> CommandResult {
    match verdict {
        Verdict::Applied => CommandResult::Accepted,
        Verdict::Ignored(reason) => CommandResult::Ignored { reason },
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Session error: {0}")]
    Session(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{spawn_session, SessionSettings};
    use guard_core::{IgnoreReason, Preferences};
    use tokio::net::UnixStream;
    use tokio_util::sync::CancellationToken;

    /// A handler on one end of a socket pair, driven from the other end.
    struct Harness {
        lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
        task: tokio::task::JoinHandle<Option<ClientId>>,
        subscribers: SubscribersMap,
        cancel: CancellationToken,
    }

    impl Harness {
        fn start() -> Self {
            let cancel = CancellationToken::new();
            let (session, _task) =
                spawn_session(Preferences::default(), SessionSettings::default(), cancel.clone());
            let subscribers: SubscribersMap = Arc::new(RwLock::new(HashMap::new()));

            let (daemon_end, client_end) = UnixStream::pair().unwrap();
            let (reader, writer) = daemon_end.into_split();
            let handler = ConnectionHandler::new(
                reader,
                writer,
                session,
                RootWindow::new(),
                Arc::clone(&subscribers),
                7,
            );
            let task = tokio::spawn(handler.run());

            let (reader, writer) = client_end.into_split();
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
                task,
                subscribers,
                cancel,
            }
        }

        async fn send(&mut self, msg: &ClientMessage) {
            let json = serde_json::to_string(msg).unwrap();
            self.writer.write_all(json.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn recv(&mut self) -> DaemonMessage {
            let line = timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            serde_json::from_str(&line).unwrap()
        }
    }

    #[test]
    fn test_verdict_maps_to_command_result() {
        assert_eq!(command_result(Verdict::Applied), CommandResult::Accepted);
        assert_eq!(
            command_result(Verdict::Ignored(IgnoreReason::NotActive)),
            CommandResult::Ignored {
                reason: IgnoreReason::NotActive
            }
        );
    }

    #[tokio::test]
    async fn test_numbered_client_id_and_intern() {
        let mut h = Harness::start();
        h.send(&ClientMessage::connect(None)).await;
        match h.recv().await {
            DaemonMessage::Connected { client_id, .. } => assert_eq!(client_id, "client-7"),
            other => panic!("expected Connected, got {other:?}"),
        }

        h.send(&ClientMessage::intern_atom("LOCK")).await;
        match h.recv().await {
            DaemonMessage::AtomInterned { atom, .. } => assert_eq!(atom, Some(Atom::LOCK)),
            other => panic!("expected AtomInterned, got {other:?}"),
        }

        h.send(&ClientMessage::disconnect()).await;
        assert_eq!(h.task.await.unwrap(), None);
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn test_subscriber_id_returned_for_cleanup() {
        let mut h = Harness::start();
        h.send(&ClientMessage::connect(None)).await;
        h.recv().await;

        // Empty root window, so no snapshot; the pong orders the reply.
        h.send(&ClientMessage::subscribe()).await;
        h.send(&ClientMessage::ping(1)).await;
        assert!(matches!(h.recv().await, DaemonMessage::Pong { seq: 1 }));
        assert!(h.subscribers.read().await.contains_key("client-7"));

        drop(h.writer);
        assert_eq!(h.task.await.unwrap().as_deref(), Some("client-7"));
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn test_oversized_line_closes_connection() {
        let mut h = Harness::start();
        h.send(&ClientMessage::connect(None)).await;
        h.recv().await;

        // Never terminated: the reader must give up at the limit rather
        // than buffer until a newline arrives.
        let huge = "x".repeat(MAX_MESSAGE_SIZE + 1);
        h.writer.write_all(huge.as_bytes()).await.unwrap();

        let closed = timeout(Duration::from_secs(5), h.task).await.unwrap().unwrap();
        assert_eq!(closed, None);
        h.cancel.cancel();
    }
}
