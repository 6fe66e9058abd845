//! OAuth2 authorization-code login with PKCE against well-known providers.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use super::error::AuthError;
use crate::models::FederatedUser;

const STATE_BYTES: usize = 32;
const PKCE_VERIFIER_BYTES: usize = 32;
const USER_AGENT: &str = "login-service";

/// Provider-native state of one authorization round-trip. Stored verbatim in
/// the auth session between Init and Callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthSession {
    pub auth_url: String,
    pub code_verifier: String,
}

impl OAuthSession {
    /// The `state` parameter embedded in the authorization URL.
    pub fn state(&self) -> Option<String> {
        let url = Url::parse(&self.auth_url).ok()?;
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned());
        state
    }

    pub fn marshal(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn unmarshal(data: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

#[derive(Debug, Clone)]
pub struct OAuthTokens {
    pub access_token: String,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Build the authorization URL carrying `state`.
    fn begin_auth(&self, state: &str) -> Result<OAuthSession, AuthError>;

    async fn exchange_code(
        &self,
        session: &OAuthSession,
        code: &str,
    ) -> Result<OAuthTokens, AuthError>;

    async fn fetch_user(&self, tokens: &OAuthTokens) -> Result<FederatedUser, AuthError>;
}

/// Random state nonce, URL-safe base64.
pub fn new_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// PKCE verifier and its S256 challenge.
fn new_pkce() -> (String, String) {
    let mut bytes = [0u8; PKCE_VERIFIER_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

// ============================================================================
// Presets
// ============================================================================

/// Endpoints and profile mapping of a known provider.
pub struct ProviderPreset {
    pub id: &'static str,
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub user_url: &'static str,
    /// Where to look for the primary address when the profile has none.
    pub emails_url: Option<&'static str>,
    pub scopes: &'static [&'static str],
    pub map_profile: fn(&Value) -> FederatedUser,
}

pub const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        id: "github",
        authorize_url: "https://github.com/login/oauth/authorize",
        token_url: "https://github.com/login/oauth/access_token",
        user_url: "https://api.github.com/user",
        emails_url: Some("https://api.github.com/user/emails"),
        scopes: &["read:user", "user:email"],
        map_profile: map_github,
    },
    ProviderPreset {
        id: "gitlab",
        authorize_url: "https://gitlab.com/oauth/authorize",
        token_url: "https://gitlab.com/oauth/token",
        user_url: "https://gitlab.com/api/v4/user",
        emails_url: None,
        scopes: &["read_user"],
        map_profile: map_gitlab,
    },
    ProviderPreset {
        id: "google",
        authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
        token_url: "https://oauth2.googleapis.com/token",
        user_url: "https://openidconnect.googleapis.com/v1/userinfo",
        emails_url: None,
        scopes: &["openid", "email", "profile"],
        map_profile: map_oidc,
    },
    ProviderPreset {
        id: "facebook",
        authorize_url: "https://www.facebook.com/v18.0/dialog/oauth",
        token_url: "https://graph.facebook.com/v18.0/oauth/access_token",
        user_url: "https://graph.facebook.com/v18.0/me?fields=id,name,email,picture,link",
        emails_url: None,
        scopes: &["email", "public_profile"],
        map_profile: map_facebook,
    },
    ProviderPreset {
        id: "linkedin",
        authorize_url: "https://www.linkedin.com/oauth/v2/authorization",
        token_url: "https://www.linkedin.com/oauth/v2/accessToken",
        user_url: "https://api.linkedin.com/v2/userinfo",
        emails_url: None,
        scopes: &["openid", "profile", "email"],
        map_profile: map_oidc,
    },
];

pub fn preset(id: &str) -> Option<&'static ProviderPreset> {
    PRESETS.iter().find(|p| p.id == id)
}

/// String or numeric field as a string; empty when absent.
fn field(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn opt_field(v: &Value, key: &str) -> Option<String> {
    Some(field(v, key)).filter(|s| !s.is_empty())
}

fn map_github(v: &Value) -> FederatedUser {
    FederatedUser {
        external_id: field(v, "id"),
        email: field(v, "email"),
        name: field(v, "name"),
        nick_name: field(v, "login"),
        avatar_url: opt_field(v, "avatar_url"),
        profile_url: opt_field(v, "html_url"),
    }
}

fn map_gitlab(v: &Value) -> FederatedUser {
    FederatedUser {
        external_id: field(v, "id"),
        email: field(v, "email"),
        name: field(v, "name"),
        nick_name: field(v, "username"),
        avatar_url: opt_field(v, "avatar_url"),
        profile_url: opt_field(v, "web_url"),
    }
}

fn map_oidc(v: &Value) -> FederatedUser {
    FederatedUser {
        external_id: field(v, "sub"),
        email: field(v, "email"),
        name: field(v, "name"),
        nick_name: field(v, "given_name"),
        avatar_url: opt_field(v, "picture"),
        profile_url: opt_field(v, "profile"),
    }
}

fn map_facebook(v: &Value) -> FederatedUser {
    FederatedUser {
        external_id: field(v, "id"),
        email: field(v, "email"),
        name: field(v, "name"),
        nick_name: String::new(),
        avatar_url: v
            .pointer("/picture/data/url")
            .and_then(Value::as_str)
            .map(str::to_string),
        profile_url: opt_field(v, "link"),
    }
}

// ============================================================================
// Generic authorization-code client
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailEntry {
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

pub struct OAuth2Provider {
    preset: &'static ProviderPreset,
    client_id: String,
    client_secret: SecretString,
    redirect_url: String,
    http: reqwest::Client,
}

impl OAuth2Provider {
    pub fn new(
        preset: &'static ProviderPreset,
        client_id: String,
        client_secret: SecretString,
        base_url: &str,
        http: reqwest::Client,
    ) -> Self {
        Self {
            preset,
            client_id,
            client_secret,
            redirect_url: format!(
                "{}/api/oauth/{}/callback",
                base_url.trim_end_matches('/'),
                preset.id
            ),
            http,
        }
    }

    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, AuthError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthError::ProviderRejected(format!("{} request failed: {}", self.preset.id, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::ProviderRejected(format!(
                "{} returned {} for {}",
                self.preset.id, status, url
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AuthError::ProviderRejected(format!("{} sent malformed JSON: {}", self.preset.id, e)))
    }

    async fn primary_email(&self, url: &str, tokens: &OAuthTokens) -> Result<Option<String>, AuthError> {
        let emails: Vec<EmailEntry> = self.get_json(url, &tokens.access_token).await?;
        Ok(emails
            .into_iter()
            .find(|e| e.primary && e.verified)
            .map(|e| e.email))
    }
}

#[async_trait]
impl OAuthProvider for OAuth2Provider {
    fn id(&self) -> &str {
        self.preset.id
    }

    fn begin_auth(&self, state: &str) -> Result<OAuthSession, AuthError> {
        let (code_verifier, challenge) = new_pkce();

        let mut url = Url::parse(self.preset.authorize_url)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("bad authorize URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.preset.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256");

        Ok(OAuthSession {
            auth_url: url.into(),
            code_verifier,
        })
    }

    async fn exchange_code(
        &self,
        session: &OAuthSession,
        code: &str,
    ) -> Result<OAuthTokens, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
            ("code_verifier", session.code_verifier.as_str()),
        ];

        let response = self
            .http
            .post(self.preset.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::ProviderRejected(format!("{} token request failed: {}", self.preset.id, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(provider = self.preset.id, %status, body = %body, "Token exchange failed");
            return Err(AuthError::ProviderRejected(format!(
                "{} token exchange returned {}",
                self.preset.id, status
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::ProviderRejected(format!("{} token response malformed: {}", self.preset.id, e)))?;

        match (token.access_token, token.error) {
            (Some(access_token), None) if !access_token.is_empty() => Ok(OAuthTokens { access_token }),
            (_, Some(error)) => Err(AuthError::ProviderRejected(format!(
                "{}: {}",
                error,
                token.error_description.unwrap_or_default()
            ))),
            _ => Err(AuthError::ProviderRejected(format!(
                "{} returned no access token",
                self.preset.id
            ))),
        }
    }

    async fn fetch_user(&self, tokens: &OAuthTokens) -> Result<FederatedUser, AuthError> {
        let profile: Value = self.get_json(self.preset.user_url, &tokens.access_token).await?;
        let mut user = (self.preset.map_profile)(&profile);

        if user.email.is_empty() {
            if let Some(url) = self.preset.emails_url {
                if let Some(email) = self.primary_email(url, tokens).await? {
                    user.email = email;
                }
            }
        }
        Ok(user)
    }
}
