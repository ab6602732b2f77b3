//! saverguard authenticator
//!
//! The authenticator runs as its own short-lived process. It starts with
//! whatever privileges it was installed with, lets the chosen backend do
//! its privileged setup, drops privileges for good, and only then opens a
//! prompt surface and talks to the user.
//!
//! The ordering is enforced by types: backend setup needs a
//! [`PrivilegeGuard<Elevated>`](privilege::PrivilegeGuard), every surface
//! constructor needs a `PrivilegeGuard<Dropped>`, and the only way to get
//! the latter is to consume the former.

pub mod authenticator;
pub mod backend;
pub mod cli;
pub mod conversation;
pub mod error;
pub mod privilege;
pub mod report;
pub mod surface;

pub use authenticator::{Authenticator, StepResult};
pub use backend::{AuthBackend, EchoPolicy, Prompt, PromptKind};
pub use conversation::{AttemptHandle, AttemptState};
pub use error::{AuthError, BackendError, PrivilegeError, SurfaceError};
pub use privilege::{Dropped, Elevated, PrivilegeGuard};
pub use report::{AuthReport, EXIT_FAILURE, EXIT_SUCCESS};
pub use surface::{PromptSurface, SurfaceReply};
