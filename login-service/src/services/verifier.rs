//! Cross-cutting checks the handshake delegates to, passed in explicitly so
//! tests can swap them.

use url::Url;

use super::error::AuthError;
use crate::models::{Domain, User};
use service_core::utils::signature::SIGNATURE_LEN;

/// Validated SSO settings of a domain.
#[derive(Debug, Clone)]
pub struct SsoConfig {
    pub url: Url,
    pub secret: Vec<u8>,
}

pub trait Verifier: Send + Sync {
    /// Validate and decode the SSO settings of `domain`.
    fn domain_sso_config(&self, domain: &Domain) -> Result<SsoConfig, AuthError>;

    /// Whether `user` may log in at all.
    fn user_can_authenticate(&self, user: &User) -> Result<(), AuthError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultVerifier;

impl Verifier for DefaultVerifier {
    fn domain_sso_config(&self, domain: &Domain) -> Result<SsoConfig, AuthError> {
        if !domain.auth_sso {
            return Err(AuthError::SsoMisconfigured("SSO is disabled".into()));
        }

        let raw_url = domain.sso_url.trim();
        if raw_url.is_empty() {
            return Err(AuthError::SsoMisconfigured("SSO URL is missing".into()));
        }
        let url = Url::parse(raw_url)
            .map_err(|e| AuthError::SsoMisconfigured(format!("SSO URL is invalid: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(AuthError::SsoMisconfigured("SSO URL must be an absolute http(s) URL".into()));
        }

        let secret = match domain.sso_secret.as_deref() {
            Some(s) if !s.is_empty() => hex::decode(s)
                .map_err(|e| AuthError::SsoMisconfigured(format!("SSO secret is not valid hex: {}", e)))?,
            _ => return Err(AuthError::SsoMisconfigured("SSO secret is missing".into())),
        };
        if secret.len() != SIGNATURE_LEN {
            return Err(AuthError::SsoMisconfigured(format!(
                "SSO secret must be {} bytes, got {}",
                SIGNATURE_LEN,
                secret.len()
            )));
        }

        Ok(SsoConfig { url, secret })
    }

    fn user_can_authenticate(&self, user: &User) -> Result<(), AuthError> {
        if user.banned {
            return Err(AuthError::UserBanned);
        }
        if user.locked {
            return Err(AuthError::UserLocked);
        }
        Ok(())
    }
}
