//! Authentication backends.
//!
//! A backend does two things: an optional privileged initialization
//! (before the privilege drop) and verification of the collected
//! responses (after it). Between the two the conversation collects one
//! response per prompt the backend asks for.

use zeroize::Zeroizing;

use crate::error::{AuthError, BackendError};
use crate::privilege::{Elevated, PrivilegeGuard};

pub mod file;
pub mod helper;
#[cfg(feature = "pam")]
pub mod pam_service;

pub use file::FileBackend;
pub use helper::HelperBackend;
#[cfg(feature = "pam")]
pub use pam_service::PamBackend;

/// What a prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// A secret such as a password.
    Secret,
    /// A visible value such as a one-time code.
    Text,
}

/// How typed characters are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoPolicy {
    Echo,
    /// One mask character per typed character.
    Mask,
    /// Nothing shown at all.
    Hidden,
}

/// One question in the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub echo: EchoPolicy,
    pub label: String,
}

impl Prompt {
    pub fn password() -> Self {
        Self {
            kind: PromptKind::Secret,
            echo: EchoPolicy::Mask,
            label: "Password:".to_string(),
        }
    }
}

/// Collected responses, wiped when dropped.
pub type Responses = [Zeroizing<String>];

/// A way of checking credentials.
pub trait AuthBackend: Send {
    fn name(&self) -> &'static str;

    /// Privileged setup. Errors mean "try the next backend".
    fn initialize(
        &mut self,
        user: &str,
        guard: &PrivilegeGuard<Elevated>,
    ) -> Result<(), BackendError>;

    /// The prompts to present, in order.
    fn prompts(&self) -> Vec<Prompt> {
        vec![Prompt::password()]
    }

    /// Checks the responses, one per prompt.
    fn verify(&self, user: &str, responses: &Responses) -> Result<(), BackendError>;
}

/// Names accepted by `--backend`.
pub const BACKEND_NAMES: &[&str] = &[
    helper::NAME,
    file::NAME,
    #[cfg(feature = "pam")]
    pam_service::NAME,
];

/// Builds a backend by name with its default settings.
pub fn by_name(name: &str) -> Result<Box<dyn AuthBackend>, AuthError> {
    match name {
        helper::NAME => Ok(Box::new(HelperBackend::default())),
        file::NAME => Ok(Box::new(FileBackend::default())),
        #[cfg(feature = "pam")]
        pam_service::NAME => Ok(Box::new(PamBackend::default())),
        other => Err(AuthError::UnknownBackend(other.to_string())),
    }
}

/// The default backend order: PAM when built in, then the credential
/// file, then the system password helper.
pub fn default_chain() -> Vec<Box<dyn AuthBackend>> {
    let mut chain: Vec<Box<dyn AuthBackend>> = Vec::new();
    #[cfg(feature = "pam")]
    chain.push(Box::new(PamBackend::default()));
    chain.push(Box::new(FileBackend::default()));
    chain.push(Box::new(HelperBackend::default()));
    chain
}

/// First response, or empty.
pub(crate) fn first_response(responses: &Responses) -> &str {
    responses.first().map(|r| r.as_str()).unwrap_or_default()
}
