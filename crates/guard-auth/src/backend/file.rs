//! Verification against a root-only credential file.
//!
//! Each non-comment line is `user:$argon2id$...`. The file is read during
//! privileged initialization; the hash is checked after the drop. A user
//! with no entry makes the backend unavailable, so the next backend in
//! the chain gets the attempt.

use std::fs;
use std::path::PathBuf;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::{debug, warn};

use super::{first_response, AuthBackend, Responses};
use crate::error::BackendError;
use crate::privilege::{Elevated, PrivilegeGuard};

pub const NAME: &str = "file";

pub const DEFAULT_PATH: &str = "/etc/saverguard/passwd";

#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    /// The user's hash, once initialized.
    hash: Option<String>,
}

impl Default for FileBackend {
    fn default() -> Self {
        Self::new(DEFAULT_PATH)
    }
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hash: None,
        }
    }

    /// Formats a credential file line for `user`.
    pub fn hash_entry(user: &str, password: &str) -> Result<String, BackendError> {
        Ok(format!("{user}:{}", hash_password(password)?))
    }
}

fn hash_password(password: &str) -> Result<String, BackendError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| BackendError::Verification(e.to_string()))
}

/// Finds `user`'s hash in the file text.
fn lookup(text: &str, user: &str) -> Result<Option<String>, BackendError> {
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (name, hash) = line.split_once(':').ok_or_else(|| BackendError::BadCredentialFile {
            line: idx + 1,
            reason: "expected user:hash".to_string(),
        })?;
        if name == user {
            return Ok(Some(hash.to_string()));
        }
    }
    Ok(None)
}

#[cfg(unix)]
fn warn_if_readable(path: &std::path::Path, meta: &fs::Metadata) {
    use std::os::unix::fs::PermissionsExt;
    if meta.permissions().mode() & 0o077 != 0 {
        warn!(path = %path.display(), "Credential file is accessible to other users");
    }
}

#[cfg(not(unix))]
fn warn_if_readable(_path: &std::path::Path, _meta: &fs::Metadata) {}

impl AuthBackend for FileBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initialize(
        &mut self,
        user: &str,
        _guard: &PrivilegeGuard<Elevated>,
    ) -> Result<(), BackendError> {
        let meta = fs::metadata(&self.path).map_err(|e| BackendError::Unavailable {
            backend: NAME,
            reason: format!("{}: {e}", self.path.display()),
        })?;
        warn_if_readable(&self.path, &meta);

        let text = fs::read_to_string(&self.path)?;
        let Some(hash) = lookup(&text, user)? else {
            debug!(path = %self.path.display(), "No credential entry for user");
            return Err(BackendError::Unavailable {
                backend: NAME,
                reason: format!("no entry for {user} in {}", self.path.display()),
            });
        };
        self.hash = Some(hash);
        Ok(())
    }

    fn verify(&self, _user: &str, responses: &Responses) -> Result<(), BackendError> {
        let hash = self.hash.as_deref().ok_or(BackendError::Unavailable {
            backend: NAME,
            reason: "not initialized".to_string(),
        })?;
        let parsed =
            PasswordHash::new(hash).map_err(|e| BackendError::Verification(e.to_string()))?;

        Argon2::default()
            .verify_password(first_response(responses).as_bytes(), &parsed)
            .map_err(|_| BackendError::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zeroize::Zeroizing;

    fn credential_file(lines: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# saverguard credentials").unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn test_verifies_known_user() {
        let file = credential_file(&[FileBackend::hash_entry("alice", "hunter2").unwrap()]);
        let guard = PrivilegeGuard::acquire();
        let mut backend = FileBackend::new(file.path());
        backend.initialize("alice", &guard).unwrap();

        assert!(backend.verify("alice", &[Zeroizing::new("hunter2".into())]).is_ok());
        assert!(matches!(
            backend.verify("alice", &[Zeroizing::new("nope".into())]),
            Err(BackendError::Rejected)
        ));
    }

    #[test]
    fn test_user_without_entry_is_unavailable() {
        let file = credential_file(&[FileBackend::hash_entry("alice", "hunter2").unwrap()]);
        let guard = PrivilegeGuard::acquire();
        let mut backend = FileBackend::new(file.path());

        let err = backend.initialize("mallory", &guard).unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { backend: NAME, .. }));
        assert!(err.to_string().contains("mallory"));

        // Never initialized, so nothing verifies.
        assert!(matches!(
            backend.verify("mallory", &[Zeroizing::new(String::new())]),
            Err(BackendError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let guard = PrivilegeGuard::acquire();
        let mut backend = FileBackend::new("/nonexistent/saverguard/passwd");
        assert!(matches!(
            backend.initialize("alice", &guard),
            Err(BackendError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_malformed_line_is_reported() {
        let file = credential_file(&["no separator here".to_string()]);
        let guard = PrivilegeGuard::acquire();
        let mut backend = FileBackend::new(file.path());
        assert!(matches!(
            backend.initialize("alice", &guard),
            Err(BackendError::BadCredentialFile { line: 2, .. })
        ));
    }
}
