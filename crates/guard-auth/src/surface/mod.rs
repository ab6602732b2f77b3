//! Prompt surfaces: where the user sees prompts and types answers.
//!
//! Every constructor takes a `&PrivilegeGuard<Dropped>`, so no surface
//! can exist while the process still holds privileges.

use std::fmt;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::backend::Prompt;
use crate::error::SurfaceError;
use crate::privilege::{Dropped, PrivilegeGuard, ProcessIds};

pub mod dialog;
pub mod scripted;
pub mod terminal;

pub use scripted::ScriptedSurface;
pub use terminal::TerminalSurface;

/// What came back from one prompt.
#[derive(Clone, PartialEq, Eq)]
pub enum SurfaceReply {
    Submitted(Zeroizing<String>),
    Cancelled,
    /// No keystroke within the inactivity timeout.
    TimedOut,
}

impl fmt::Debug for SurfaceReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted(_) => f.write_str("Submitted(<redacted>)"),
            Self::Cancelled => f.write_str("Cancelled"),
            Self::TimedOut => f.write_str("TimedOut"),
        }
    }
}

/// A place to ask the user for input.
pub trait PromptSurface {
    /// Shows one prompt and blocks until submit, cancel, or `timeout`
    /// without a keystroke.
    fn prompt(&mut self, prompt: &Prompt, timeout: Duration) -> Result<SurfaceReply, SurfaceError>;

    /// Shows a status line (e.g. "Authentication failed").
    fn show_message(&mut self, message: &str) -> Result<(), SurfaceError>;
}

/// Runtime double check behind the type-level one.
pub(crate) fn ensure_unprivileged(guard: &PrivilegeGuard<Dropped>) -> Result<(), SurfaceError> {
    guard.verify().map_err(|_| {
        let ids = ProcessIds::current();
        SurfaceError::Privileged {
            uid: ids.uid,
            euid: ids.euid,
        }
    })
}
