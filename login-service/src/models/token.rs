//! Bearer tokens correlating the two halves of a login handshake.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Owner id of a token not yet bound to any user.
pub const ANONYMOUS_USER_ID: Uuid = Uuid::nil();

/// Number of random bytes behind a token value (hex-encoded on the wire).
pub const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum TokenScope {
    Login,
    ResetPassword,
    ConfirmEmail,
    ConfirmEmailUpdate,
}

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Login => "login",
            TokenScope::ResetPassword => "reset_password",
            TokenScope::ConfirmEmail => "confirm_email",
            TokenScope::ConfirmEmailUpdate => "confirm_email_update",
        }
    }
}

impl std::str::FromStr for TokenScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(TokenScope::Login),
            "reset_password" => Ok(TokenScope::ResetPassword),
            "confirm_email" => Ok(TokenScope::ConfirmEmail),
            "confirm_email_update" => Ok(TokenScope::ConfirmEmailUpdate),
            _ => Err(format!("Invalid token scope: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Token {
    /// 64 lowercase hex characters.
    pub value: String,
    pub owner: Uuid,
    pub scope: TokenScope,
    pub expires_at: DateTime<Utc>,
    pub multiuse: bool,
}

impl Token {
    /// Mint a fresh anonymous token from the OS random source.
    pub fn new_anonymous(scope: TokenScope, ttl: Duration, multiuse: bool) -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);

        Self {
            value: hex::encode(bytes),
            owner: ANONYMOUS_USER_ID,
            scope,
            expires_at: Utc::now() + ttl,
            multiuse,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.owner == ANONYMOUS_USER_ID
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Raw bytes behind the hex value, as signed in the SSO exchange.
    pub fn value_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(&self.value)
    }
}
