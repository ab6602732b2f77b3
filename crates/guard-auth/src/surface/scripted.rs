//! A surface that replays canned replies, for tests.

use std::collections::VecDeque;
use std::time::Duration;

use zeroize::Zeroizing;

use super::{ensure_unprivileged, PromptSurface, SurfaceReply};
use crate::backend::Prompt;
use crate::error::SurfaceError;
use crate::privilege::{Dropped, PrivilegeGuard};

#[derive(Debug, Default)]
pub struct ScriptedSurface {
    replies: VecDeque<SurfaceReply>,
    shown: Vec<Prompt>,
    messages: Vec<String>,
}

impl ScriptedSurface {
    pub fn new(
        guard: &PrivilegeGuard<Dropped>,
        replies: impl IntoIterator<Item = SurfaceReply>,
    ) -> Result<Self, SurfaceError> {
        ensure_unprivileged(guard)?;
        Ok(Self {
            replies: replies.into_iter().collect(),
            ..Self::default()
        })
    }

    /// Answers each prompt with the next of `answers`.
    pub fn answering<'a>(
        guard: &PrivilegeGuard<Dropped>,
        answers: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, SurfaceError> {
        Self::new(
            guard,
            answers
                .into_iter()
                .map(|a| SurfaceReply::Submitted(Zeroizing::new(a.to_string()))),
        )
    }

    /// Prompts shown so far, in order.
    pub fn shown(&self) -> &[Prompt] {
        &self.shown
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

impl PromptSurface for ScriptedSurface {
    fn prompt(&mut self, prompt: &Prompt, _timeout: Duration) -> Result<SurfaceReply, SurfaceError> {
        self.shown.push(prompt.clone());
        self.replies.pop_front().ok_or(SurfaceError::Exhausted)
    }

    fn show_message(&mut self, message: &str) -> Result<(), SurfaceError> {
        self.messages.push(message.to_string());
        Ok(())
    }
}
