//! The two-phase login handshake.
//!
//! Init mints (or reuses) an anonymous token, stores an auth session and
//! hands back where to send the browser. Callback takes that session exactly
//! once, verifies what the provider sent back and resolves it to an account,
//! all account changes happening in one transaction.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::avatar::AvatarService;
use super::error::AuthError;
use super::federation::{CallbackParams, Federation};
use super::identity::{IdentityResolver, SignupMeta};
use super::metrics::{record_handshake, PHASE_CALLBACK, PHASE_INIT};
use super::oauth;
use super::registry::{ProviderLookup, ProviderRegistry, SSO_PROVIDER_ID};
use super::signup_policy::SignupPolicy;
use super::sso;
use super::store::{AuthSessionStore, DomainStore, TokenStore, UserDirectory};
use super::token::TokenLifecycle;
use super::verifier::Verifier;
use crate::models::{AuthSession, Domain, DomainRole, User, UserResponse};
use crate::utils::ip::display_ip;
use service_core::tasks::{BackgroundTasks, TaskOutcome};

#[derive(Debug, Clone)]
pub struct HandshakeSettings {
    pub auth_session_ttl: Duration,
    pub login_token_ttl: Duration,
    pub use_gravatar: bool,
    pub log_full_ips: bool,
    pub secure_cookies: bool,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            auth_session_ttl: Duration::minutes(15),
            login_token_ttl: Duration::minutes(15),
            use_gravatar: false,
            log_full_ips: false,
            secure_cookies: false,
        }
    }
}

/// Everything the handshake talks to.
pub struct HandshakeDeps {
    pub tokens: Arc<dyn TokenStore>,
    pub sessions: Arc<dyn AuthSessionStore>,
    pub domains: Arc<dyn DomainStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub registry: ProviderRegistry,
    pub signup: Arc<dyn SignupPolicy>,
    pub verifier: Arc<dyn Verifier>,
    pub avatars: Arc<dyn AvatarService>,
    pub tasks: BackgroundTasks,
    pub settings: HandshakeSettings,
}

#[derive(Debug, Clone, Default)]
pub struct InitRequest {
    pub provider: String,
    pub host: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieSameSite {
    Lax,
    None,
}

#[derive(Debug, Clone)]
pub struct InitResponse {
    pub redirect_url: String,
    /// Value for the auth-session cookie.
    pub session_id: Uuid,
    pub session_ttl: Duration,
    pub same_site: CookieSameSite,
    pub secure: bool,
}

/// Who is on the other end of the callback request.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<IpAddr>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub provider: String,
    /// Raw auth-session cookie value, if the browser sent one.
    pub session_cookie: Option<String>,
    pub params: CallbackParams,
    pub client: ClientInfo,
}

/// How the result page reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Popup window; the page just closes it.
    Interactive,
    /// Hidden SSO frame; the page posts the result to its parent.
    NonInteractive,
}

#[derive(Debug)]
pub struct LoginResult {
    pub user: UserResponse,
    pub created: bool,
    pub domain_role: Option<DomainRole>,
    /// Avatar refresh dispatched after commit, if any.
    pub avatar_task: Option<JoinHandle<TaskOutcome>>,
}

#[derive(Debug)]
pub struct CallbackOutcome {
    pub mode: ResponseMode,
    pub result: Result<LoginResult, AuthError>,
}

#[derive(Clone)]
pub struct HandshakeService {
    deps: Arc<HandshakeDeps>,
    tokens: TokenLifecycle,
}

impl HandshakeService {
    pub fn new(deps: HandshakeDeps) -> Self {
        let tokens = TokenLifecycle::new(deps.tokens.clone(), deps.settings.login_token_ttl);
        Self {
            deps: Arc::new(deps),
            tokens,
        }
    }

    pub fn settings(&self) -> &HandshakeSettings {
        &self.deps.settings
    }

    /// `SameSite` and `Secure` for the auth-session cookie on `provider`'s
    /// routes. The removal at callback must match what Init set, or a
    /// browser drops it inside a cross-site frame.
    pub fn cookie_attributes(&self, provider: &str) -> (CookieSameSite, bool) {
        let secure = self.deps.settings.secure_cookies;
        // SSO may run in a cross-site frame. SameSite=None needs Secure.
        if provider.trim() == SSO_PROVIDER_ID && secure {
            (CookieSameSite::None, secure)
        } else {
            (CookieSameSite::Lax, secure)
        }
    }

    // ========================================================================
    // Init
    // ========================================================================

    #[tracing::instrument(skip(self, req), fields(provider = %req.provider))]
    pub async fn init(&self, req: InitRequest) -> Result<InitResponse, AuthError> {
        let lookup = self.deps.registry.lookup(req.provider.trim());
        let label = provider_label(&lookup, req.provider.trim()).to_string();

        let result = self.run_init(lookup, req).await;
        match &result {
            Ok(_) => record_handshake(PHASE_INIT, &label, "success"),
            Err(e) => {
                log_failure(PHASE_INIT, &label, e);
                record_handshake(PHASE_INIT, &label, e.code());
            }
        }
        result
    }

    async fn run_init(&self, lookup: ProviderLookup, req: InitRequest) -> Result<InitResponse, AuthError> {
        let host = normalize_host(req.host.as_deref());

        let (federation, host) = match lookup {
            ProviderLookup::Unknown => return Err(AuthError::UnknownProvider),
            ProviderLookup::NotConfigured => return Err(AuthError::ProviderNotConfigured),
            ProviderLookup::Sso => {
                let host = host.ok_or_else(|| AuthError::InvalidInput("host is required for SSO".into()))?;
                let domain = self.domain_for_init(&host).await?;
                let config = self.deps.verifier.domain_sso_config(&domain)?;
                (Federation::Sso(config), host)
            }
            ProviderLookup::OAuth(provider) => {
                if let Some(host) = &host {
                    self.domain_for_init(host).await?;
                }
                (Federation::OAuth(provider), host.unwrap_or_default())
            }
        };

        let token = self.tokens.obtain_for_init(req.token.as_deref()).await?;

        let (redirect_url, data) = match &federation {
            Federation::Sso(config) => (sso::login_url(config, &token)?, String::new()),
            Federation::OAuth(provider) => {
                let session = provider.begin_auth(&oauth::new_state())?;
                let data = session.marshal()?;
                (session.auth_url, data)
            }
        };

        let session = AuthSession::new(
            req.provider.trim().to_string(),
            token.value,
            host,
            data,
            self.deps.settings.auth_session_ttl,
        );
        self.deps.sessions.create(&session).await?;

        let (same_site, secure) = self.cookie_attributes(&session.provider);
        tracing::debug!(session_id = %session.id, host = %session.host, "Auth session created");

        Ok(InitResponse {
            redirect_url,
            session_id: session.id,
            session_ttl: self.deps.settings.auth_session_ttl,
            same_site,
            secure,
        })
    }

    async fn domain_for_init(&self, host: &str) -> Result<Domain, AuthError> {
        self.deps
            .domains
            .find_by_host(host)
            .await?
            .ok_or_else(|| AuthError::InvalidInput(format!("unknown host {}", host)))
    }

    // ========================================================================
    // Callback
    // ========================================================================

    #[tracing::instrument(skip(self, req), fields(provider = %req.provider))]
    pub async fn callback(&self, req: CallbackRequest) -> CallbackOutcome {
        let lookup = self.deps.registry.lookup(req.provider.trim());
        let label = provider_label(&lookup, req.provider.trim()).to_string();

        let mut mode = ResponseMode::Interactive;
        let result = self.run_callback(lookup, req, &mut mode).await;

        match &result {
            Ok(login) => {
                tracing::info!(user_id = %login.user.id, created = login.created, "Login handshake completed");
                record_handshake(PHASE_CALLBACK, &label, "success");
            }
            Err(e) => {
                log_failure(PHASE_CALLBACK, &label, e);
                record_handshake(PHASE_CALLBACK, &label, e.code());
            }
        }

        CallbackOutcome { mode, result }
    }

    async fn run_callback(
        &self,
        lookup: ProviderLookup,
        req: CallbackRequest,
        mode: &mut ResponseMode,
    ) -> Result<LoginResult, AuthError> {
        // Session resume: taken before anything else so it can never be
        // used twice, whatever happens next.
        let session_id = req
            .session_cookie
            .as_deref()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(AuthError::SessionInvalid)?;
        let session = self
            .deps
            .sessions
            .take(session_id)
            .await?
            .ok_or(AuthError::SessionInvalid)?;
        if session.is_expired() {
            return Err(AuthError::SessionInvalid);
        }
        // A session started at one provider never completes at another.
        if session.provider != req.provider.trim() {
            tracing::warn!(
                started_with = %session.provider,
                returned_to = %req.provider.trim(),
                "Callback arrived on another provider's route"
            );
            return Err(AuthError::SessionInvalid);
        }

        let token = self.tokens.resume_anonymous(&session.token_value).await?;

        let domain = match session.host() {
            Some(host) => Some(self.deps.domains.find_by_host(host).await?.ok_or_else(|| {
                AuthError::Internal(anyhow::anyhow!("domain for host {} not found", host))
            })?),
            None => None,
        };

        let federation = match lookup {
            ProviderLookup::Unknown => return Err(AuthError::UnknownProvider),
            ProviderLookup::NotConfigured => return Err(AuthError::ProviderNotConfigured),
            ProviderLookup::OAuth(provider) => Federation::OAuth(provider),
            ProviderLookup::Sso => {
                let domain = domain
                    .as_ref()
                    .ok_or_else(|| AuthError::InvalidInput("host is required for SSO".into()))?;
                if domain.sso_non_interactive {
                    *mode = ResponseMode::NonInteractive;
                }
                Federation::Sso(self.deps.verifier.domain_sso_config(domain)?)
            }
        };

        let verified = federation.verify(&session, &token, &req.params).await?;
        if let Some(field) = verified.user.missing_field() {
            return Err(AuthError::InvalidFederatedProfile(field.to_string()));
        }

        let meta = SignupMeta {
            ip: display_ip(req.client.ip, self.deps.settings.log_full_ips),
            country: req.client.country.unwrap_or_default(),
            host: session.host.clone(),
        };

        let mut tx = self.deps.directory.begin().await?;

        let resolver = IdentityResolver {
            verifier: self.deps.verifier.as_ref(),
            signup: self.deps.signup.as_ref(),
        };
        let resolved = resolver
            .resolve(
                tx.as_mut(),
                federation.auth_mode(),
                federation.signup_kind(),
                &verified.user,
                domain.as_ref(),
                &meta,
            )
            .await?;
        let user = resolved.user;

        if !tx.rebind_token(&token.value, user.id).await? {
            return Err(AuthError::BadToken);
        }

        let domain_role = match &domain {
            Some(domain) => {
                let default_role = verified.role.unwrap_or(DomainRole::Commenter);
                let (binding, created) = tx
                    .find_or_create_domain_user(domain.id, user.id, default_role)
                    .await?;
                match verified.role {
                    Some(role) if !created && role != binding.role => {
                        tx.update_domain_user_role(domain.id, user.id, role).await?;
                        tracing::info!(user_id = %user.id, domain_id = %domain.id, role = role.as_str(), "Domain role updated");
                        Some(role)
                    }
                    _ => Some(binding.role),
                }
            }
            None => None,
        };

        tx.commit().await?;

        let avatar_task = self.refresh_avatar(&user, verified.user.avatar_url);

        Ok(LoginResult {
            user: user.sanitized(),
            created: resolved.created,
            domain_role,
            avatar_task,
        })
    }

    /// Fire off the avatar refresh. Never fails the login.
    fn refresh_avatar(&self, user: &User, avatar_url: Option<String>) -> Option<JoinHandle<TaskOutcome>> {
        let avatars = self.deps.avatars.clone();
        let user_id = user.id;

        if let Some(url) = avatar_url {
            return Some(self.deps.tasks.spawn("avatar_refresh", async move {
                avatars.update_from_url(user_id, &url).await
            }));
        }

        if self.deps.settings.use_gravatar {
            let email = user.email.clone();
            return Some(self.deps.tasks.spawn("gravatar_refresh", async move {
                avatars.update_from_gravatar(user_id, &email).await
            }));
        }

        None
    }
}

/// Metrics label for the provider; arbitrary ids collapse to `unknown`.
fn provider_label<'a>(lookup: &ProviderLookup, id: &'a str) -> &'a str {
    match lookup {
        ProviderLookup::Unknown => "unknown",
        _ => id,
    }
}

fn normalize_host(host: Option<&str>) -> Option<String> {
    host.map(|h| h.trim().to_lowercase()).filter(|h| !h.is_empty())
}

fn log_failure(phase: &'static str, provider: &str, err: &AuthError) {
    if err.is_internal() {
        tracing::error!(phase, provider, code = err.code(), error = %format!("{:#}", err), "Login handshake failed");
    } else {
        tracing::warn!(phase, provider, code = err.code(), error = %err, "Login handshake rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host(Some("  Blog.Example.COM ")), Some("blog.example.com".into()));
        assert_eq!(normalize_host(Some("   ")), None);
        assert_eq!(normalize_host(None), None);
    }

    #[test]
    fn test_provider_label() {
        assert_eq!(provider_label(&ProviderLookup::Unknown, "<script>"), "unknown");
        assert_eq!(provider_label(&ProviderLookup::Sso, "sso"), "sso");
    }
}
