//! The display socket.
//!
//! Clients connect over a Unix socket and speak newline-delimited JSON:
//! a `Connect` handshake, then property reads, `SendEvent` commands and
//! optional `PropertyNotify` subscriptions.
//!
//! ```text
//! ┌─────────────────┐
//! │   DaemonServer  │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  SessionHandle  │
//! │   (per client)  │     │   RootWindow    │
//! └─────────────────┘     └─────────────────┘
//!         ▲
//!         │ PropertyNotify
//! ┌─────────────────┐
//! │   broadcaster   │
//! └─────────────────┘
//! ```

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, SubscriberWriter, SubscribersMap};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use guard_protocol::DaemonMessage;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::root::{PropertyChange, RootWindow};
use crate::session::SessionHandle;

/// Maximum number of concurrent `PropertyNotify` subscribers.
pub const MAX_SUBSCRIBERS: usize = 32;

pub struct DaemonServer {
    socket_path: PathBuf,
    session: SessionHandle,
    root: RootWindow,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
    subscribers: SubscribersMap,
}

impl DaemonServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        session: SessionHandle,
        root: RootWindow,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            session,
            root,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket and serves until the token is cancelled.
    ///
    /// # Errors
    ///
    /// `ServerError::AlreadyRunning` when another daemon answers on the
    /// socket; `ServerError::SocketSetup` when binding fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.claim_socket().await?;

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| ServerError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;

        info!(socket = %self.socket_path.display(), "Display socket listening");

        self.spawn_notify_broadcaster();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => match result {
                    Ok((stream, _addr)) => {
                        let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                        self.handle_connection(stream, conn_num);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Removes a stale socket file, refusing if a daemon still answers.
    async fn claim_socket(&self) -> Result<(), ServerError> {
        if self.socket_path.exists() {
            if UnixStream::connect(&self.socket_path).await.is_ok() {
                return Err(ServerError::AlreadyRunning {
                    path: self.socket_path.clone(),
                });
            }
            debug!(socket = %self.socket_path.display(), "Removing stale socket");
            std::fs::remove_file(&self.socket_path).map_err(|e| ServerError::SocketSetup {
                path: self.socket_path.clone(),
                error: e.to_string(),
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| ServerError::SocketSetup {
                    path: self.socket_path.clone(),
                    error: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    fn handle_connection(&self, stream: UnixStream, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let session = self.session.clone();
        let root = self.root.clone();
        let subscribers = Arc::clone(&self.subscribers);

        tokio::spawn(async move {
            let handler = ConnectionHandler::new(
                reader,
                writer,
                session,
                root,
                Arc::clone(&subscribers),
                connection_number,
            );

            let client_id = handler.run().await;

            if let Some(id) = client_id {
                if subscribers.write().await.remove(&id).is_some() {
                    debug!(client_id = %id, "Removed disconnected subscriber");
                }
            }
        });
    }

    /// Forwards root property changes to every subscriber.
    fn spawn_notify_broadcaster(&self) {
        let mut changes = self.root.subscribe();
        let subscribers = Arc::clone(&self.subscribers);
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Notify broadcaster shutting down");
                        break;
                    }

                    result = changes.recv() => match result {
                        Ok(change) => broadcast_change(&subscribers, &change).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Notify broadcaster lagged, skipped changes");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    async fn cleanup(&self) {
        self.subscribers.write().await.clear();

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

async fn broadcast_change(subscribers: &SubscribersMap, change: &PropertyChange) {
    let msg = DaemonMessage::property_notify(change.atom, change.value.clone());
    let json = match serde_json::to_string(&msg) {
        Ok(j) => j,
        Err(e) => {
            error!(error = %e, "Failed to serialize PropertyNotify");
            return;
        }
    };

    let subs = subscribers.read().await;
    let mut failed_clients = Vec::new();

    for (client_id, writer) in subs.iter() {
        let mut writer = writer.lock().await;
        let send_result = async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = send_result {
            debug!(client_id = %client_id, error = %e, "Failed to notify subscriber");
            failed_clients.push(client_id.clone());
        }
    }

    drop(subs);

    if !failed_clients.is_empty() {
        let mut subs = subscribers.write().await;
        for client_id in failed_clients {
            subs.remove(&client_id);
            debug!(client_id = %client_id, "Removed failed subscriber");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("Another daemon is already serving {path}")]
    AlreadyRunning { path: PathBuf },
}
