//! Domain-operated SSO: the commenting site's own backend vouches for the
//! user with an HMAC-signed JSON payload.

use serde::Deserialize;
use url::Url;
use validator::ValidateEmail;

use super::error::AuthError;
use super::verifier::SsoConfig;
use crate::models::{DomainRole, FederatedUser, Token, VerifiedIdentity};
use service_core::utils::signature;

#[derive(Debug, Deserialize)]
struct SsoPayload {
    token: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
    photo: Option<String>,
    link: Option<String>,
    role: Option<String>,
}

/// URL the browser is sent to: the domain's SSO endpoint with the token and
/// its HMAC appended.
pub fn login_url(config: &SsoConfig, token: &Token) -> Result<String, AuthError> {
    let token_bytes = token
        .value_bytes()
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("token value is not hex: {}", e)))?;
    let hmac = signature::sign_hex(&token_bytes, &config.secret)?;

    let mut url = config.url.clone();
    url.query_pairs_mut()
        .append_pair("token", &token.value)
        .append_pair("hmac", &hmac);
    Ok(url.into())
}

/// Authenticate the `payload`/`hmac` pair returned by the SSO endpoint and
/// turn it into an identity.
pub fn verify_payload(
    config: &SsoConfig,
    token: &Token,
    payload_hex: Option<&str>,
    hmac_hex: Option<&str>,
) -> Result<VerifiedIdentity, AuthError> {
    let payload_hex = payload_hex
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::InvalidInput("payload is missing".into()))?;
    let hmac_hex = hmac_hex
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::InvalidInput("hmac is missing".into()))?;

    let payload = hex::decode(payload_hex)
        .map_err(|e| AuthError::InvalidInput(format!("payload is not valid hex: {}", e)))?;
    let hmac = hex::decode(hmac_hex)
        .map_err(|e| AuthError::InvalidInput(format!("hmac is not valid hex: {}", e)))?;

    // Nothing in the payload is looked at before the signature checks out.
    if !signature::verify(&payload, &hmac, &config.secret)? {
        return Err(AuthError::SignatureInvalid);
    }

    let parsed: SsoPayload = serde_json::from_slice(&payload)
        .map_err(|e| AuthError::InvalidInput(format!("malformed SSO payload: {}", e)))?;

    if parsed.token != token.value {
        return Err(AuthError::SignatureInvalid);
    }

    let email = parsed.email.trim().to_string();
    if !email.is_empty() && !email.validate_email() {
        return Err(AuthError::InvalidFederatedProfile("email".into()));
    }

    let role = match parsed.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(r) => Some(
            DomainRole::from_sso_assertion(r)
                .ok_or_else(|| AuthError::InvalidFederatedProfile("role".into()))?,
        ),
        None => None,
    };

    Ok(VerifiedIdentity {
        user: FederatedUser {
            // Sites are free to vary the capitalisation between logins.
            external_id: email.to_lowercase(),
            email,
            name: parsed.name.trim().to_string(),
            nick_name: String::new(),
            avatar_url: parsed.photo.filter(|u| is_absolute_url(u)),
            profile_url: parsed.link.filter(|u| is_absolute_url(u)),
        },
        role,
    })
}

fn is_absolute_url(s: &str) -> bool {
    Url::parse(s)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}
