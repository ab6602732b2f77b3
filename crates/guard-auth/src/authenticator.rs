//! Drives attempts: backend selection, the prompt loop, verification.

use std::time::Duration;

use guard_core::AttemptOutcome;
use tracing::{debug, info, warn};

use crate::backend::AuthBackend;
use crate::conversation::{AttemptHandle, AttemptState};
use crate::error::{AuthError, SurfaceError};
use crate::privilege::{Elevated, PrivilegeGuard};
use crate::surface::{PromptSurface, SurfaceReply};

/// Result of one conversation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// A response was recorded; more prompts may follow.
    Answered,
    Cancelled,
    TimedOut,
    /// Nothing left to ask.
    Done,
}

pub struct Authenticator {
    backends: Vec<Box<dyn AuthBackend>>,
    timeout: Duration,
}

impl Authenticator {
    /// `backends` are tried in order; `timeout` is the per-prompt
    /// inactivity limit (`passwdTimeout`).
    pub fn new(backends: Vec<Box<dyn AuthBackend>>, timeout: Duration) -> Self {
        Self { backends, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts an attempt with the first backend that initializes.
    ///
    /// Runs backend setup, so it needs the elevated phase.
    pub fn begin_attempt(
        &mut self,
        user: &str,
        guard: &PrivilegeGuard<Elevated>,
    ) -> Result<AttemptHandle, AuthError> {
        let mut tried = Vec::new();

        for mut backend in std::mem::take(&mut self.backends) {
            match backend.initialize(user, guard) {
                Ok(()) => {
                    info!(backend = backend.name(), "Authentication backend ready");
                    return Ok(AttemptHandle::new(user, backend));
                }
                Err(e) => {
                    debug!(backend = backend.name(), error = %e, "Backend unavailable");
                    tried.push(backend.name());
                }
            }
        }

        Err(AuthError::BackendUnavailable {
            tried: tried.join(", "),
        })
    }

    /// Presents the pending prompt and records the reply.
    pub fn conversation_step(
        &self,
        handle: &mut AttemptHandle,
        surface: &mut dyn PromptSurface,
    ) -> Result<StepResult, SurfaceError> {
        let Some(prompt) = handle.next_prompt().cloned() else {
            return Ok(StepResult::Done);
        };

        match surface.prompt(&prompt, self.timeout)? {
            SurfaceReply::Submitted(response) => {
                handle.answer(response);
                Ok(StepResult::Answered)
            }
            SurfaceReply::Cancelled => {
                handle.abort(AttemptOutcome::Cancelled);
                Ok(StepResult::Cancelled)
            }
            SurfaceReply::TimedOut => {
                handle.abort(AttemptOutcome::TimedOut);
                Ok(StepResult::TimedOut)
            }
        }
    }

    /// Verifies the collected responses and ends the attempt.
    ///
    /// Every rejection becomes the same generic failure.
    pub fn finish_attempt(&self, handle: AttemptHandle) -> AttemptOutcome {
        let outcome = match handle.state() {
            AttemptState::Finished(outcome) => outcome.clone(),
            AttemptState::Prompting { .. } => {
                warn!("Attempt finished with unanswered prompts");
                AttemptOutcome::failure()
            }
            AttemptState::Collected => {
                match handle.backend().verify(handle.user(), handle.responses()) {
                    Ok(()) => AttemptOutcome::Success,
                    Err(e) => {
                        debug!(backend = handle.backend_name(), error = %e, "Verification failed");
                        AttemptOutcome::failure()
                    }
                }
            }
        };

        info!(
            backend = handle.backend_name(),
            outcome = outcome.label(),
            "Attempt finished"
        );
        outcome
    }

    /// Runs the whole conversation and verification on `surface`.
    pub fn run(
        &self,
        mut handle: AttemptHandle,
        surface: &mut dyn PromptSurface,
    ) -> Result<AttemptOutcome, SurfaceError> {
        loop {
            match self.conversation_step(&mut handle, surface)? {
                StepResult::Answered => continue,
                StepResult::Cancelled | StepResult::TimedOut | StepResult::Done => break,
            }
        }

        let outcome = self.finish_attempt(handle);
        if let Some(message) = outcome.user_message() {
            surface.show_message(message)?;
        }
        Ok(outcome)
    }
}
