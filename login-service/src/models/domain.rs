//! Commenting domains and the per-domain role bindings of users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A commenting domain, as far as login is concerned.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Domain {
    pub id: Uuid,
    pub host: String,
    /// SSO login switched on for this domain.
    pub auth_sso: bool,
    pub sso_url: String,
    /// Hex-encoded shared secret, if one has been generated.
    pub sso_secret: Option<String>,
    /// SSO runs in a hidden frame and reports back via `postMessage`.
    pub sso_non_interactive: bool,
    pub sso_signup_enabled: bool,
    pub federated_signup_enabled: bool,
}

impl Domain {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            host: host.into(),
            auth_sso: false,
            sso_url: String::new(),
            sso_secret: None,
            sso_non_interactive: false,
            sso_signup_enabled: true,
            federated_signup_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum DomainRole {
    Owner,
    Moderator,
    Commenter,
    Readonly,
}

impl DomainRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainRole::Owner => "owner",
            DomainRole::Moderator => "moderator",
            DomainRole::Commenter => "commenter",
            DomainRole::Readonly => "readonly",
        }
    }

    /// Parse a role asserted by an SSO payload. `readonly` is a moderation
    /// outcome, never something a remote site may assert.
    pub fn from_sso_assertion(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(DomainRole::Owner),
            "moderator" => Some(DomainRole::Moderator),
            "commenter" => Some(DomainRole::Commenter),
            _ => None,
        }
    }
}

impl std::str::FromStr for DomainRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(DomainRole::Owner),
            "moderator" => Ok(DomainRole::Moderator),
            "commenter" => Ok(DomainRole::Commenter),
            "readonly" => Ok(DomainRole::Readonly),
            _ => Err(format!("Invalid domain role: {}", s)),
        }
    }
}

/// Role binding of a user on a domain.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DomainUser {
    pub domain_id: Uuid,
    pub user_id: Uuid,
    pub role: DomainRole,
    pub created_at: DateTime<Utc>,
}

impl DomainUser {
    pub fn new(domain_id: Uuid, user_id: Uuid, role: DomainRole) -> Self {
        Self {
            domain_id,
            user_id,
            role,
            created_at: Utc::now(),
        }
    }
}
