//! Error types for the authenticator.

use std::io;

use thiserror::Error;

/// Failure to give up privileges. Always fatal: the process exits
/// before any surface is opened.
#[derive(Error, Debug)]
pub enum PrivilegeError {
    #[error("setgroups failed: {0}")]
    SetGroups(#[source] io::Error),

    #[error("setgid({gid}) failed: {source}")]
    SetGid { gid: u32, source: io::Error },

    #[error("setuid({uid}) failed: {source}")]
    SetUid { uid: u32, source: io::Error },

    /// Effective ids still differ from the real ids.
    #[error("still privileged after drop: uid={uid} euid={euid} gid={gid} egid={egid}")]
    StillPrivileged { uid: u32, euid: u32, gid: u32, egid: u32 },

    /// `setuid(0)` succeeded after the drop.
    #[error("was able to regain root after dropping privileges")]
    RegainedRoot,
}

/// A single backend could not initialize or verify.
///
/// Never shown to the user; logged at debug level only.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend does not apply on this system or to this user.
    #[error("{backend} not available: {reason}")]
    Unavailable { backend: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("credential file line {line}: {reason}")]
    BadCredentialFile { line: usize, reason: String },

    /// Credentials did not verify.
    #[error("credentials rejected")]
    Rejected,

    #[error("verification error: {0}")]
    Verification(String),
}

/// A prompt surface failed (terminal gone, drawing failed).
#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("surface opened with privileges: uid={uid} euid={euid}")]
    Privileged { uid: u32, euid: u32 },

    #[error("standard input is not a terminal")]
    NotATerminal,

    #[error("scripted surface ran out of replies")]
    Exhausted,
}

/// Top-level authenticator errors.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No backend could be initialized; the screen stays locked.
    #[error("no authentication backend available (tried: {tried})")]
    BackendUnavailable { tried: String },

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),
}
