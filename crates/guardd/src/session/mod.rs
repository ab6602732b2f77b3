//! The session actor.
//!
//! ```text
//! ┌─────────────────┐  SessionCommand  ┌─────────────────┐  SessionEvent  ┌─────────────────┐
//! │ ConnectionHandler│────────────────▶│  SessionActor   │──────────────▶│  RootWindow     │
//! │ PrefsWatcher     │    (mpsc)       │ SessionMachine  │  (broadcast)  │ (status prop)   │
//! └─────────────────┘                  └───────┬─────────┘               └─────────────────┘
//!                                              │ effects
//!                                   ┌──────────┴──────────┐
//!                                   ▼                     ▼
//!                             DemoRunner            AuthSupervisor
//! ```
//!
//! The actor's timers, demo children and authenticator child all live
//! inside its task; nothing else mutates session state.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use guard_core::Preferences;

mod actor;
mod commands;
mod handle;

pub use actor::{SessionActor, SessionSettings};
pub use commands::{ExitKind, SessionCommand, SessionError, SessionEvent, SessionStatus};
pub use handle::SessionHandle;

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 64;

/// Spawns the session actor.
///
/// The join handle yields how the daemon should end. Cancelling
/// `cancel` stops the actor; an accepted `EXIT` or `RESTART` cancels it
/// in turn so the server shuts down too.
pub fn spawn_session(
    preferences: Preferences,
    settings: SessionSettings,
    cancel: CancellationToken,
) -> (SessionHandle, JoinHandle<ExitKind>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = SessionActor::new(cmd_rx, event_tx.clone(), preferences, settings, cancel);
    let task = tokio::spawn(actor.run());

    (SessionHandle::new(cmd_tx, event_tx), task)
}
