//! Rules for the anonymous bearer token that drives a handshake.

use std::sync::Arc;

use chrono::Duration;

use super::error::AuthError;
use super::store::TokenStore;
use crate::models::{Token, TokenScope};

#[derive(Clone)]
pub struct TokenLifecycle {
    store: Arc<dyn TokenStore>,
    login_ttl: Duration,
}

impl TokenLifecycle {
    pub fn new(store: Arc<dyn TokenStore>, login_ttl: Duration) -> Self {
        Self { store, login_ttl }
    }

    /// Token for a new handshake: the caller's own token when one is given
    /// and still usable, a fresh single-use login token otherwise.
    pub async fn obtain_for_init(&self, supplied: Option<&str>) -> Result<Token, AuthError> {
        match supplied.map(str::trim).filter(|v| !v.is_empty()) {
            Some(value) => self.resume_anonymous(value).await,
            None => Ok(self
                .store
                .issue_anonymous(TokenScope::Login, self.login_ttl, false)
                .await?),
        }
    }

    /// Load a token that must still be an unexpired anonymous bearer.
    pub async fn resume_anonymous(&self, value: &str) -> Result<Token, AuthError> {
        let token = self
            .store
            .find_by_value(value, false)
            .await?
            .ok_or(AuthError::BadToken)?;

        if token.is_expired() {
            return Err(AuthError::Expired);
        }
        if !token.is_anonymous() {
            return Err(AuthError::BadToken);
        }
        Ok(token)
    }
}
