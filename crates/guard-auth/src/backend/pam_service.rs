//! Verification through a PAM service.

use std::path::Path;

use super::{first_response, AuthBackend, Responses};
use crate::error::BackendError;
use crate::privilege::{Elevated, PrivilegeGuard};

pub const NAME: &str = "pam";

const DEFAULT_SERVICE: &str = "saverguard";
const FALLBACK_SERVICE: &str = "login";

#[derive(Debug, Clone)]
pub struct PamBackend {
    service: String,
}

impl Default for PamBackend {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
        }
    }
}

impl PamBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl AuthBackend for PamBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initialize(
        &mut self,
        _user: &str,
        _guard: &PrivilegeGuard<Elevated>,
    ) -> Result<(), BackendError> {
        let configured = |s: &str| Path::new("/etc/pam.d").join(s).exists();
        if !configured(&self.service) {
            if !configured(FALLBACK_SERVICE) {
                return Err(BackendError::Unavailable {
                    backend: NAME,
                    reason: format!("no PAM service {} or {FALLBACK_SERVICE}", self.service),
                });
            }
            tracing::debug!(service = FALLBACK_SERVICE, "PAM service missing, falling back");
            self.service = FALLBACK_SERVICE.to_string();
        }
        Ok(())
    }

    fn verify(&self, user: &str, responses: &Responses) -> Result<(), BackendError> {
        let mut client = ::pam::Client::with_password(&self.service)
            .map_err(|e| BackendError::Verification(e.to_string()))?;
        client
            .conversation_mut()
            .set_credentials(user, first_response(responses));
        client.authenticate().map_err(|_| BackendError::Rejected)
    }
}
