//! Verification through an external setuid checker.
//!
//! The default is PAM's `unix_chkpwd`, which reads a NUL-terminated
//! password on stdin and exits 0 when it matches the user's shadow entry.
//! This works without the authenticator itself ever being able to read
//! the shadow file.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use super::{first_response, AuthBackend, Responses};
use crate::error::BackendError;
use crate::privilege::{Elevated, PrivilegeGuard};

pub const NAME: &str = "helper";

const DEFAULT_PROGRAMS: &[&str] = &["/usr/sbin/unix_chkpwd", "/sbin/unix_chkpwd"];

/// Placeholder in `args` replaced by the user name.
const USER_PLACEHOLDER: &str = "{user}";

#[derive(Debug, Clone)]
pub struct HelperBackend {
    program: Option<PathBuf>,
    args: Vec<String>,
}

impl Default for HelperBackend {
    fn default() -> Self {
        Self {
            program: None,
            args: vec![USER_PLACEHOLDER.to_string(), "nullok".to_string()],
        }
    }
}

impl HelperBackend {
    /// Uses `program` with `args`; `{user}` in an argument is replaced by
    /// the user name.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: Some(program.into()),
            args,
        }
    }

    fn resolve_program(&self) -> Option<PathBuf> {
        match &self.program {
            Some(p) => p.exists().then(|| p.clone()),
            None => DEFAULT_PROGRAMS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists()),
        }
    }
}

impl AuthBackend for HelperBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initialize(
        &mut self,
        _user: &str,
        _guard: &PrivilegeGuard<Elevated>,
    ) -> Result<(), BackendError> {
        let program = self.resolve_program().ok_or(BackendError::Unavailable {
            backend: NAME,
            reason: "no password helper installed".to_string(),
        })?;
        debug!(program = %program.display(), "Using password helper");
        self.program = Some(program);
        Ok(())
    }

    fn verify(&self, user: &str, responses: &Responses) -> Result<(), BackendError> {
        let program = self.program.as_ref().ok_or(BackendError::Unavailable {
            backend: NAME,
            reason: "not initialized".to_string(),
        })?;

        let args = self.args.iter().map(|a| a.replace(USER_PLACEHOLDER, user));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let password = first_response(responses);
            // A helper that exits early closes the pipe; its exit status
            // still decides.
            let _ = stdin
                .write_all(password.as_bytes())
                .and_then(|_| stdin.write_all(b"\0"));
        }

        let status = child.wait()?;
        debug!(status = ?status.code(), "Password helper exited");
        if status.success() {
            Ok(())
        } else {
            Err(BackendError::Rejected)
        }
    }
}
