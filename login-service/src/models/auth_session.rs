//! Auth session model - short-lived, single-use handshake state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Auth session entity. Created by Init, taken (read and deleted in one step)
/// by Callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthSession {
    pub id: Uuid,
    /// Provider id Init ran for (`sso` or an OAuth provider). The callback
    /// must arrive on the same provider's route.
    pub provider: String,
    /// Value of the anonymous token driving this handshake.
    pub token_value: String,
    /// Serialized provider session (empty for SSO).
    pub data: String,
    /// Commenting-domain host; empty for admin UI logins.
    pub host: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn new(
        provider: String,
        token_value: String,
        host: String,
        data: String,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            provider,
            token_value,
            data,
            host,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Seconds left before expiry, never negative.
    pub fn remaining_seconds(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    pub fn host(&self) -> Option<&str> {
        Some(self.host.as_str()).filter(|h| !h.is_empty())
    }
}
