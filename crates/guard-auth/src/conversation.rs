//! One authentication attempt as a resumable state machine.
//!
//! ```text
//! Prompting{0} ─answer─▶ Prompting{1} ─answer─▶ … ─▶ Collected
//!      │                                               │
//!      └──cancel / timeout──▶ Finished(outcome) ◀──finish──┘
//! ```
//!
//! The handle never talks to a surface itself; the authenticator drives
//! it one prompt at a time.

use std::fmt;
use std::time::Instant;

use guard_core::AttemptOutcome;
use zeroize::Zeroizing;

use crate::backend::{AuthBackend, Prompt};

/// Where the attempt currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    /// Waiting for the answer to prompt `index`.
    Prompting { index: usize },
    /// Every prompt has been answered; ready to verify.
    Collected,
    /// Terminal.
    Finished(AttemptOutcome),
}

/// A live attempt: the chosen backend, its prompts and the answers so far.
pub struct AttemptHandle {
    user: String,
    backend: Box<dyn AuthBackend>,
    prompts: Vec<Prompt>,
    responses: Vec<Zeroizing<String>>,
    state: AttemptState,
    started_at: Instant,
}

impl AttemptHandle {
    pub(crate) fn new(user: &str, backend: Box<dyn AuthBackend>) -> Self {
        let prompts = backend.prompts();
        let state = if prompts.is_empty() {
            AttemptState::Collected
        } else {
            AttemptState::Prompting { index: 0 }
        };
        Self {
            user: user.to_string(),
            backend,
            prompts,
            responses: Vec::new(),
            state,
            started_at: Instant::now(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// The prompt waiting for an answer, if any.
    pub fn next_prompt(&self) -> Option<&Prompt> {
        match self.state {
            AttemptState::Prompting { index } => self.prompts.get(index),
            _ => None,
        }
    }

    /// Number of prompts answered so far.
    pub fn answered(&self) -> usize {
        self.responses.len()
    }

    pub(crate) fn answer(&mut self, response: Zeroizing<String>) {
        let AttemptState::Prompting { index } = self.state else {
            return;
        };
        self.responses.push(response);
        let next = index + 1;
        self.state = if next < self.prompts.len() {
            AttemptState::Prompting { index: next }
        } else {
            AttemptState::Collected
        };
    }

    /// Ends the attempt without verifying. No-op once finished.
    pub(crate) fn abort(&mut self, outcome: AttemptOutcome) {
        if !matches!(self.state, AttemptState::Finished(_)) {
            self.responses.clear();
            self.state = AttemptState::Finished(outcome);
        }
    }

    pub(crate) fn backend(&self) -> &dyn AuthBackend {
        self.backend.as_ref()
    }

    pub(crate) fn responses(&self) -> &[Zeroizing<String>] {
        &self.responses
    }
}

impl fmt::Debug for AttemptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Responses are never printed.
        f.debug_struct("AttemptHandle")
            .field("user", &self.user)
            .field("backend", &self.backend.name())
            .field("prompts", &self.prompts.len())
            .field("answered", &self.responses.len())
            .field("state", &self.state)
            .finish()
    }
}
