//! User model - durable platform accounts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// How an account authenticates. Exactly one mode applies to any user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode<'a> {
    Local,
    Idp(&'a str),
    Sso,
}

/// User entity.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// Empty unless the account has a local password.
    pub password_hash: String,
    pub federated_idp: Option<String>,
    pub federated_sso: bool,
    /// Subject asserted by the identity provider; empty for local accounts.
    pub federated_id: String,
    pub website_url: String,
    pub confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub banned: bool,
    pub locked: bool,
    pub signup_ip: String,
    pub signup_country: String,
    pub signup_host: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    /// Create a user with a local password. Federated logins never call this;
    /// it exists for fixtures and for accounts imported by other services.
    pub fn new_local(email: String, name: String, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            name,
            password_hash,
            federated_idp: None,
            federated_sso: false,
            federated_id: String::new(),
            website_url: String::new(),
            confirmed: false,
            confirmed_at: None,
            banned: false,
            locked: false,
            signup_ip: String::new(),
            signup_country: String::new(),
            signup_host: String::new(),
            created_at: Utc::now(),
            last_login_at: None,
        }
    }

    /// Create a user vouched for by an identity provider. The provider has
    /// verified the email, so the account starts out confirmed.
    pub fn new_federated(email: String, name: String, mode: AuthMode<'_>, federated_id: String) -> Self {
        let now = Utc::now();
        let mut user = Self::new_local(email, name, String::new());
        user.confirmed = true;
        user.confirmed_at = Some(now);
        user.federated_id = federated_id;
        user.set_auth_mode(mode);
        user.last_login_at = Some(now);
        user
    }

    pub fn is_local(&self) -> bool {
        self.federated_idp.is_none() && !self.federated_sso
    }

    pub fn auth_mode(&self) -> AuthMode<'_> {
        if self.federated_sso {
            AuthMode::Sso
        } else if let Some(idp) = &self.federated_idp {
            AuthMode::Idp(idp)
        } else {
            AuthMode::Local
        }
    }

    fn set_auth_mode(&mut self, mode: AuthMode<'_>) {
        match mode {
            AuthMode::Local => {
                self.federated_idp = None;
                self.federated_sso = false;
            }
            AuthMode::Idp(id) => {
                self.federated_idp = Some(id.to_string());
                self.federated_sso = false;
            }
            AuthMode::Sso => {
                self.federated_idp = None;
                self.federated_sso = true;
            }
        }
    }

    /// Record the provider binding on an existing federated account.
    pub fn bind_federation(&mut self, mode: AuthMode<'_>, federated_id: String) {
        self.set_auth_mode(mode);
        self.federated_id = federated_id;
    }

    /// Convert to sanitized response (no sensitive fields).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self)
    }
}

/// User response for API (without sensitive fields).
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub federated_idp: Option<String>,
    pub federated_sso: bool,
    pub website_url: String,
    pub confirmed: bool,
}

impl From<&User> for UserResponse {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
            federated_idp: u.federated_idp.clone(),
            federated_sso: u.federated_sso,
            website_url: u.website_url.clone(),
            confirmed: u.confirmed,
        }
    }
}
