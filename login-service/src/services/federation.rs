//! The two ways a callback can vouch for a user, behind one `verify`.

use std::sync::Arc;

use serde::Deserialize;
use subtle::ConstantTimeEq;

use super::error::AuthError;
use super::oauth::{OAuthProvider, OAuthSession};
use super::registry::SSO_PROVIDER_ID;
use super::signup_policy::SignupKind;
use super::sso;
use super::verifier::SsoConfig;
use crate::models::{AuthMode, AuthSession, Token, VerifiedIdentity};

/// Query parameters a provider may send back on callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub payload: Option<String>,
    pub hmac: Option<String>,
}

pub enum Federation {
    OAuth(Arc<dyn OAuthProvider>),
    Sso(SsoConfig),
}

impl Federation {
    pub fn id(&self) -> &str {
        match self {
            Federation::OAuth(p) => p.id(),
            Federation::Sso(_) => SSO_PROVIDER_ID,
        }
    }

    /// Mode an account created or matched through this federation must have.
    pub fn auth_mode(&self) -> AuthMode<'_> {
        match self {
            Federation::OAuth(p) => AuthMode::Idp(p.id()),
            Federation::Sso(_) => AuthMode::Sso,
        }
    }

    pub fn signup_kind(&self) -> SignupKind {
        match self {
            Federation::OAuth(_) => SignupKind::Federated,
            Federation::Sso(_) => SignupKind::Sso,
        }
    }

    pub async fn verify(
        &self,
        session: &AuthSession,
        token: &Token,
        params: &CallbackParams,
    ) -> Result<VerifiedIdentity, AuthError> {
        match self {
            Federation::Sso(config) => {
                sso::verify_payload(config, token, params.payload.as_deref(), params.hmac.as_deref())
            }
            Federation::OAuth(provider) => verify_oauth(provider.as_ref(), session, params).await,
        }
    }
}

async fn verify_oauth(
    provider: &dyn OAuthProvider,
    session: &AuthSession,
    params: &CallbackParams,
) -> Result<VerifiedIdentity, AuthError> {
    if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
        return Err(AuthError::ProviderRejected(match params.error_description.as_deref() {
            Some(desc) => format!("{}: {}", error, desc),
            None => error.to_string(),
        }));
    }

    let oauth_session = OAuthSession::unmarshal(&session.data)
        .map_err(|e| AuthError::Internal(e.context("failed to restore OAuth session")))?;

    let expected = oauth_session.state().ok_or(AuthError::StateMismatch)?;
    let received = params.state.as_deref().unwrap_or_default();
    if !bool::from(expected.as_bytes().ct_eq(received.as_bytes())) {
        return Err(AuthError::StateMismatch);
    }

    let code = params
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::InvalidInput("code is missing".into()))?;

    let tokens = provider.exchange_code(&oauth_session, code).await?;
    let user = provider.fetch_user(&tokens).await?;

    Ok(VerifiedIdentity { user, role: None })
}
