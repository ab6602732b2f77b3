//! Integration tests for the display socket.
//!
//! These tests run a real `DaemonServer` against a live session actor and
//! root window, and talk to it the way `guardctl` does.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::PathBuf;
use std::time::Duration;

use guard_core::{IgnoreReason, Preferences, SaverCommand, SaverMode, SessionState};
use guard_protocol::{
    Atom, ClientMessage, ClientMessageEvent, CommandResult, DaemonMessage, MessageType,
    PropertyValue, ProtocolVersion, ScreensaverId, StatusProperty,
};
use guardd::root::{spawn_status_publisher, RootWindow};
use guardd::server::{DaemonServer, ServerError};
use guardd::session::{spawn_session, SessionHandle, SessionSettings};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for server shutdown
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Upper bound on any single reply
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    socket_path: PathBuf,
    session: SessionHandle,
    cancel_token: CancellationToken,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(sh("exit 200")).await
    }

    async fn spawn_with(auth_command: Vec<String>) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("test.sock");
        let cancel_token = CancellationToken::new();

        let prefs = Preferences {
            mode: SaverMode::Blank,
            ..Preferences::default()
        };
        let settings = SessionSettings {
            auth_command,
            ..SessionSettings::default()
        };
        let (session, _task) = spawn_session(prefs, settings, cancel_token.clone());

        let root = RootWindow::new();
        let id = ScreensaverId {
            pid: std::process::id(),
            user: "tester".into(),
            host: "testbox".into(),
        };
        root.announce(&id, "9.9.9").await;
        root.publish_status(&session.status().await.unwrap()).await;
        spawn_status_publisher(root.clone(), session.subscribe(), cancel_token.clone());

        let server = DaemonServer::new(
            socket_path.clone(),
            session.clone(),
            root,
            cancel_token.clone(),
        );
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        TestServer {
            socket_path,
            session,
            cancel_token,
            _temp_dir: temp_dir,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_raw(&json).await;
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> DaemonMessage {
        let mut line = String::new();
        timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("reply within timeout")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn handshake(&mut self) -> String {
        self.send(ClientMessage::connect(None)).await;
        match self.recv().await {
            DaemonMessage::Connected { client_id, .. } => client_id,
            other => panic!("Expected Connected, got {other:?}"),
        }
    }

    /// Subscribes and drains the initial snapshot.
    async fn subscribe(&mut self) {
        self.send(ClientMessage::subscribe()).await;
        for _ in 0..3 {
            match self.recv().await {
                DaemonMessage::PropertyNotify { .. } => {}
                other => panic!("Expected PropertyNotify, got {other:?}"),
            }
        }
    }

    async fn command(&mut self, cmd: SaverCommand) -> CommandResult {
        self.send(ClientMessage::send_event(ClientMessageEvent::command(cmd)))
            .await;
        match self.recv().await {
            DaemonMessage::CommandAck { command, result } => {
                assert_eq!(command, cmd.name());
                result
            }
            other => panic!("Expected CommandAck, got {other:?}"),
        }
    }

    async fn status(&mut self) -> StatusProperty {
        self.send(ClientMessage::get_property(Atom::SCREENSAVER_STATUS))
            .await;
        match self.recv().await {
            DaemonMessage::Property {
                value: Some(value), ..
            } => StatusProperty::from_value(&value).unwrap(),
            other => panic!("Expected status property, got {other:?}"),
        }
    }

    /// Skips notifications until `_SCREENSAVER_STATUS` reports `state`.
    async fn wait_for_state(&mut self, state: SessionState) -> StatusProperty {
        loop {
            if let DaemonMessage::PropertyNotify { atom, value } = self.recv().await {
                if atom == Atom::SCREENSAVER_STATUS {
                    let status = StatusProperty::from_value(&value).unwrap();
                    if status.state == state {
                        return status;
                    }
                }
            }
        }
    }
}

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".into(), "-c".into(), script.into(), "guard-auth".into()]
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_handshake_assigns_client_id() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let id = client.handshake().await;
    assert!(id.starts_with("client-"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_incompatible_version_rejected() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client
        .send(ClientMessage {
            protocol_version: ProtocolVersion::new(99, 0),
            message: MessageType::Connect { client_id: None },
        })
        .await;

    assert!(matches!(client.recv().await, DaemonMessage::Rejected { .. }));

    server.shutdown().await;
}

#[tokio::test]
async fn test_first_message_must_be_connect() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send(ClientMessage::ping(1)).await;
    assert!(matches!(client.recv().await, DaemonMessage::Rejected { .. }));

    server.shutdown().await;
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_identity_properties_readable() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake().await;

    client
        .send(ClientMessage::get_property(Atom::SCREENSAVER_VERSION))
        .await;
    match client.recv().await {
        DaemonMessage::Property { atom, value } => {
            assert_eq!(atom, Atom::SCREENSAVER_VERSION);
            assert_eq!(value, Some(PropertyValue::String("9.9.9".into())));
        }
        other => panic!("Expected Property, got {other:?}"),
    }

    client
        .send(ClientMessage::get_property(Atom::SCREENSAVER_ID))
        .await;
    match client.recv().await {
        DaemonMessage::Property {
            value: Some(PropertyValue::String(s)),
            ..
        } => {
            let id: ScreensaverId = s.parse().unwrap();
            assert_eq!(id.user, "tester");
        }
        other => panic!("Expected Property, got {other:?}"),
    }

    let status = client.status().await;
    assert_eq!(status.state, SessionState::Unlocked);

    server.shutdown().await;
}

#[tokio::test]
async fn test_intern_atom() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake().await;

    client.send(ClientMessage::intern_atom("LOCK")).await;
    match client.recv().await {
        DaemonMessage::AtomInterned { atom, .. } => assert_eq!(atom, Some(Atom::LOCK)),
        other => panic!("Expected AtomInterned, got {other:?}"),
    }

    client.send(ClientMessage::intern_atom("NOT_AN_ATOM")).await;
    match client.recv().await {
        DaemonMessage::AtomInterned { atom, .. } => assert_eq!(atom, None),
        other => panic!("Expected AtomInterned, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_client_cannot_write_status() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake().await;

    client
        .send(ClientMessage::change_property(
            Atom::SCREENSAVER_STATUS,
            PropertyValue::Integer(vec![0, 0, 0]),
        ))
        .await;

    match client.recv().await {
        DaemonMessage::Error { code, .. } => assert_eq!(code.as_deref(), Some("read_only")),
        other => panic!("Expected Error, got {other:?}"),
    }

    // Nothing changed.
    assert_eq!(client.status().await.state, SessionState::Unlocked);

    server.shutdown().await;
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_lock_command_updates_status() {
    let server = TestServer::spawn().await;

    let mut watcher = server.connect().await;
    watcher.handshake().await;
    watcher.subscribe().await;

    let mut client = server.connect().await;
    client.handshake().await;

    assert_eq!(client.command(SaverCommand::Lock).await, CommandResult::Accepted);

    let status = watcher.wait_for_state(SessionState::Locked).await;
    assert_eq!(status.demo, 0);
    assert_eq!(client.status().await.state, SessionState::Locked);

    server.shutdown().await;
}

#[tokio::test]
async fn test_ignored_command_reports_reason() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake().await;

    let result = client.command(SaverCommand::Cycle).await;
    assert_eq!(
        result,
        CommandResult::Ignored {
            reason: IgnoreReason::NotActive
        }
    );

    assert_eq!(client.command(SaverCommand::Lock).await, CommandResult::Accepted);
    assert_eq!(
        client.command(SaverCommand::Restart).await,
        CommandResult::Ignored {
            reason: IgnoreReason::LockedOut
        }
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_bad_client_message_rejected() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake().await;

    let event = ClientMessageEvent {
        message_type: Atom::LOCK,
        format: 32,
        data: vec![i64::from(Atom::LOCK.id())],
    };
    client.send(ClientMessage::send_event(event)).await;

    match client.recv().await {
        DaemonMessage::Error { code, .. } => assert_eq!(code.as_deref(), Some("bad_command")),
        other => panic!("Expected Error, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_deactivate_while_locked_unlocks_after_authentication() {
    let server = TestServer::spawn_with(sh("sleep 0.2; exit 200")).await;

    let mut watcher = server.connect().await;
    watcher.handshake().await;
    watcher.subscribe().await;

    let mut client = server.connect().await;
    client.handshake().await;

    assert_eq!(client.command(SaverCommand::Lock).await, CommandResult::Accepted);
    assert_eq!(
        client.command(SaverCommand::Deactivate).await,
        CommandResult::Accepted
    );

    // A second input during the attempt does not start another one.
    assert_eq!(
        client.command(SaverCommand::Deactivate).await,
        CommandResult::Ignored {
            reason: IgnoreReason::AuthenticationInProgress
        }
    );

    watcher.wait_for_state(SessionState::Authenticating).await;
    watcher.wait_for_state(SessionState::Unlocked).await;

    let status = server.session.status().await.unwrap();
    assert_eq!(status.state, SessionState::Unlocked);
    assert!(status.live_attempt.is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_failed_authentication_stays_locked() {
    let server = TestServer::spawn_with(sh("exit 255")).await;

    let mut watcher = server.connect().await;
    watcher.handshake().await;
    watcher.subscribe().await;

    let mut client = server.connect().await;
    client.handshake().await;

    client.command(SaverCommand::Lock).await;
    client.command(SaverCommand::Deactivate).await;

    watcher.wait_for_state(SessionState::Authenticating).await;
    watcher.wait_for_state(SessionState::Locked).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_exit_command_stops_server() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake().await;

    assert_eq!(client.command(SaverCommand::Exit).await, CommandResult::Accepted);

    // The accepted EXIT cancels the shared token; the server cleans up.
    let start = tokio::time::Instant::now();
    while server.socket_path.exists() && start.elapsed() < Duration::from_secs(2) {
        sleep(SOCKET_POLL_INTERVAL).await;
    }
    assert!(!server.socket_path.exists());
    assert!(server.cancel_token.is_cancelled());
}

// ============================================================================
// Connection behaviour
// ============================================================================

#[tokio::test]
async fn test_subscribe_sends_snapshot() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake().await;

    client.send(ClientMessage::subscribe()).await;

    let mut atoms = Vec::new();
    for _ in 0..3 {
        match client.recv().await {
            DaemonMessage::PropertyNotify { atom, .. } => atoms.push(atom),
            other => panic!("Expected PropertyNotify, got {other:?}"),
        }
    }
    atoms.sort();
    assert_eq!(
        atoms,
        vec![
            Atom::SCREENSAVER_STATUS,
            Atom::SCREENSAVER_VERSION,
            Atom::SCREENSAVER_ID
        ]
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_line_keeps_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake().await;

    client.send_raw("{not json").await;
    match client.recv().await {
        DaemonMessage::Error { code, .. } => assert_eq!(code.as_deref(), Some("parse_error")),
        other => panic!("Expected Error, got {other:?}"),
    }

    client.send(ClientMessage::ping(7)).await;
    assert!(matches!(client.recv().await, DaemonMessage::Pong { seq: 7 }));

    server.shutdown().await;
}

#[tokio::test]
async fn test_second_server_refused() {
    let server = TestServer::spawn().await;

    let cancel = CancellationToken::new();
    let (session, _task) =
        spawn_session(Preferences::default(), SessionSettings::default(), cancel.clone());
    let second = DaemonServer::new(
        server.socket_path.clone(),
        session,
        RootWindow::new(),
        cancel.clone(),
    );

    assert!(matches!(
        second.run().await,
        Err(ServerError::AlreadyRunning { .. })
    ));

    // The first daemon still answers.
    let mut client = server.connect().await;
    client.handshake().await;

    cancel.cancel();
    server.shutdown().await;
}

#[tokio::test]
async fn test_stale_socket_replaced() {
    let temp_dir = tempfile::tempdir().unwrap();
    let socket_path = temp_dir.path().join("stale.sock");
    // A socket file nobody listens on.
    drop(std::os::unix::net::UnixListener::bind(&socket_path).unwrap());
    assert!(socket_path.exists());

    let cancel = CancellationToken::new();
    let (session, _task) =
        spawn_session(Preferences::default(), SessionSettings::default(), cancel.clone());
    let server = DaemonServer::new(socket_path.clone(), session, RootWindow::new(), cancel.clone());
    let task = tokio::spawn(async move { server.run().await });

    let start = tokio::time::Instant::now();
    loop {
        if UnixStream::connect(&socket_path).await.is_ok() {
            break;
        }
        assert!(start.elapsed() < SOCKET_WAIT_TIMEOUT, "server never bound");
        sleep(SOCKET_POLL_INTERVAL).await;
    }

    cancel.cancel();
    assert!(task.await.unwrap().is_ok());
}
