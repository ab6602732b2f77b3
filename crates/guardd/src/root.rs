//! The root-window property table.
//!
//! The daemon is the only writer. Clients read through `GetProperty` or
//! watch `PropertyNotify`; a client `ChangeProperty` is refused with
//! [`PropertyError::ReadOnly`].

use std::collections::BTreeMap;
use std::ffi::CStr;
use std::sync::Arc;

use guard_protocol::{Atom, PropertyError, PropertyValue, ScreensaverId, StatusProperty};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::session::{SessionEvent, SessionStatus};

const NOTIFY_BUFFER: usize = 64;

/// One property write, as broadcast to watchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    pub atom: Atom,
    pub value: PropertyValue,
}

#[derive(Clone)]
pub struct RootWindow {
    properties: Arc<RwLock<BTreeMap<Atom, PropertyValue>>>,
    notify: broadcast::Sender<PropertyChange>,
}

impl Default for RootWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl RootWindow {
    /// An empty root window.
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_BUFFER);
        Self {
            properties: Arc::new(RwLock::new(BTreeMap::new())),
            notify,
        }
    }

    /// Publishes `_SCREENSAVER_VERSION` and `_SCREENSAVER_ID`.
    pub async fn announce(&self, id: &ScreensaverId, version: &str) {
        self.set(Atom::SCREENSAVER_VERSION, PropertyValue::String(version.to_string()))
            .await;
        self.set(Atom::SCREENSAVER_ID, PropertyValue::String(id.to_string()))
            .await;
    }

    pub async fn get(&self, atom: Atom) -> Option<PropertyValue> {
        self.properties.read().await.get(&atom).cloned()
    }

    /// All properties, ordered by atom.
    pub async fn snapshot(&self) -> Vec<PropertyChange> {
        self.properties
            .read()
            .await
            .iter()
            .map(|(atom, value)| PropertyChange {
                atom: *atom,
                value: value.clone(),
            })
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PropertyChange> {
        self.notify.subscribe()
    }

    /// The answer to a client trying to write `atom`.
    pub fn refuse_client_write(&self, atom: Atom) -> PropertyError {
        if atom.name().is_some() {
            PropertyError::ReadOnly(atom)
        } else {
            PropertyError::NotFound(atom)
        }
    }

    /// Writes `_SCREENSAVER_STATUS`.
    pub async fn publish_status(&self, status: &SessionStatus) {
        let value = StatusProperty::new(status.state, status.changed_at, status.demo).to_value();
        self.set(Atom::SCREENSAVER_STATUS, value).await;
    }

    /// Stores `value`; watchers are notified when it differs.
    async fn set(&self, atom: Atom, value: PropertyValue) {
        {
            let mut props = self.properties.write().await;
            if props.get(&atom) == Some(&value) {
                return;
            }
            props.insert(atom, value.clone());
        }
        debug!(%atom, ?value, "Root property changed");
        let _ = self.notify.send(PropertyChange { atom, value });
    }
}

/// Mirrors session status into `_SCREENSAVER_STATUS` until cancelled.
pub fn spawn_status_publisher(
    root: RootWindow,
    mut events: broadcast::Receiver<SessionEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                result = events.recv() => match result {
                    Ok(SessionEvent::StatusChanged(status)) => root.publish_status(&status).await,
                    Ok(SessionEvent::Exiting(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Status publisher lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Status publisher stopped");
    })
}

/// `_SCREENSAVER_ID` for this process.
pub fn local_identity() -> ScreensaverId {
    ScreensaverId {
        pid: std::process::id(),
        user: user_name().unwrap_or_else(|| "unknown".to_string()),
        host: host_name().unwrap_or_else(|| "localhost".to_string()),
    }
}

fn user_name() -> Option<String> {
    // SAFETY: getpwuid returns static storage or null; copied out at once.
    unsafe {
        let pw = libc::getpwuid(libc::getuid());
        if pw.is_null() || (*pw).pw_name.is_null() {
            return None;
        }
        Some(CStr::from_ptr((*pw).pw_name).to_string_lossy().into_owned())
    }
}

fn host_name() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for its full length.
    if unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) } != 0 {
        return None;
    }
    CStr::from_bytes_until_nul(&buf)
        .ok()
        .map(|s| s.to_string_lossy().into_owned())
}
