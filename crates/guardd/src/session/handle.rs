//! Client interface for the session actor.

use guard_core::{Preferences, SaverCommand, SessionInput, Transition};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::commands::{SessionCommand, SessionError, SessionEvent, SessionStatus};

// ============================================================================
// Session Handle
// ============================================================================

/// Cheap-to-clone handle to the session actor.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    event_sender: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn new(
        sender: mpsc::Sender<SessionCommand>,
        event_sender: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Applies `input` and returns the resulting transition.
    ///
    /// # Errors
    ///
    /// `SessionError::ChannelClosed` if the actor has stopped.
    pub async fn apply(&self, input: SessionInput) -> Result<Transition, SessionError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(SessionCommand::Apply {
                input,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;

        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Delivers a `SCREENSAVER` command.
    pub async fn command(&self, command: SaverCommand) -> Result<Transition, SessionError> {
        self.apply(SessionInput::Command(command)).await
    }

    /// Reports keyboard or pointer activity.
    pub async fn user_activity(&self) -> Result<Transition, SessionError> {
        self.apply(SessionInput::UserActivity).await
    }

    /// Kills the running authenticator; the attempt resolves to `Cancelled`.
    pub async fn cancel_authentication(&self) -> Result<Transition, SessionError> {
        self.apply(SessionInput::CancelAuthentication).await
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(SessionCommand::GetStatus { respond_to: tx })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;

        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn reload(&self, preferences: Preferences) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::Reload {
                preferences: Box::new(preferences),
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }

    /// Stops the actor. Returns once the command is queued.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::Shutdown)
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_sender.subscribe()
    }
}
