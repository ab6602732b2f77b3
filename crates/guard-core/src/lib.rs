//! saverguard core - shared domain types for the session guard
//!
//! This crate provides the types shared between the daemon (guardd),
//! the authenticator (guard-auth) and the command client (guardctl):
//! the session state machine, authentication outcomes, and the
//! dotfile-backed preference set.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod attempt;
pub mod dotfile;
pub mod error;
pub mod machine;
pub mod prefs;
pub mod state;
pub mod time;

// Re-exports for convenience
pub use attempt::{AttemptId, AttemptOutcome, GENERIC_FAILURE};
pub use dotfile::{ConfigParseError, Dotfile, DotfileEntry};
pub use error::{DomainError, DomainResult};
pub use machine::{
    DemoSelection, Effect, IgnoreReason, MachineConfig, SaverCommand, SessionInput,
    SessionMachine, Transition, Verdict,
};
pub use prefs::{LoadedPreferences, PrefKey, Preferences, ProgramEntry, SaverMode, DOTFILE_NAME};
pub use state::SessionState;
pub use time::{format_time, parse_time, TimeUnit};
