use async_trait::async_trait;

use crate::models::Domain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignupKind {
    /// Signup through an OAuth identity provider.
    Federated,
    Sso,
}

#[async_trait]
pub trait SignupPolicy: Send + Sync {
    /// `domain` is `None` for logins to the admin UI.
    async fn is_enabled(&self, domain: Option<&Domain>, kind: SignupKind) -> anyhow::Result<bool>;
}

/// Instance-level switch from configuration, domain-level switches from the
/// domain row.
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredSignupPolicy {
    pub instance_federated_signup: bool,
}

#[async_trait]
impl SignupPolicy for ConfiguredSignupPolicy {
    async fn is_enabled(&self, domain: Option<&Domain>, kind: SignupKind) -> anyhow::Result<bool> {
        Ok(match (domain, kind) {
            (None, SignupKind::Federated) => self.instance_federated_signup,
            (None, SignupKind::Sso) => false,
            (Some(d), SignupKind::Federated) => d.federated_signup_enabled,
            (Some(d), SignupKind::Sso) => d.sso_signup_enabled,
        })
    }
}
