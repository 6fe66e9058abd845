#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use login_service::config::{
    AuthConfig, DatabaseConfig, Environment, HandshakeConfig, SecurityConfig, SessionStoreConfig,
};
use login_service::models::{Domain, FederatedUser};
use login_service::services::{
    AuthError, AvatarService, CallbackOutcome, CallbackParams, CallbackRequest, ClientInfo,
    ConfiguredSignupPolicy, DefaultVerifier, HandshakeDeps, HandshakeService, HandshakeSettings,
    InitRequest, InitResponse, MemoryStore, OAuthProvider, OAuthSession, OAuthTokens,
    ProviderRegistry,
};
use login_service::AppState;
use service_core::tasks::BackgroundTasks;
use service_core::utils::signature;
use url::Url;
use uuid::Uuid;

pub const SSO_HOST: &str = "blog.example.com";
pub const SSO_SECRET: [u8; 32] = [0x42; 32];
pub const OAUTH_PROVIDER: &str = "github";
pub const SECOND_OAUTH_PROVIDER: &str = "gitlab";
pub const GOOD_CODE: &str = "good-code";

// ============================================================================
// Scripted OAuth provider
// ============================================================================

/// Stands in for a real identity provider. Any code other than [`GOOD_CODE`]
/// is rejected; the profile handed back can be swapped between calls.
pub struct ScriptedProvider {
    id: &'static str,
    profile: Mutex<FederatedUser>,
    pub exchanges: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(id: &'static str, profile: FederatedUser) -> Self {
        Self {
            id,
            profile: Mutex::new(profile),
            exchanges: AtomicUsize::new(0),
        }
    }

    pub fn set_profile(&self, profile: FederatedUser) {
        *self.profile.lock().unwrap() = profile;
    }
}

#[async_trait]
impl OAuthProvider for ScriptedProvider {
    fn id(&self) -> &str {
        self.id
    }

    fn begin_auth(&self, state: &str) -> Result<OAuthSession, AuthError> {
        let mut url = Url::parse("https://idp.test/authorize").unwrap();
        url.query_pairs_mut().append_pair("state", state);
        Ok(OAuthSession {
            auth_url: url.into(),
            code_verifier: "verifier".into(),
        })
    }

    async fn exchange_code(
        &self,
        _session: &OAuthSession,
        code: &str,
    ) -> Result<OAuthTokens, AuthError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if code != GOOD_CODE {
            return Err(AuthError::ProviderRejected("invalid_grant".into()));
        }
        Ok(OAuthTokens {
            access_token: "access".into(),
        })
    }

    async fn fetch_user(&self, _tokens: &OAuthTokens) -> Result<FederatedUser, AuthError> {
        Ok(self.profile.lock().unwrap().clone())
    }
}

pub fn octocat() -> FederatedUser {
    FederatedUser {
        external_id: "583231".into(),
        email: "octocat@github.test".into(),
        name: "The Octocat".into(),
        nick_name: "octocat".into(),
        avatar_url: Some("https://avatars.github.test/u/583231".into()),
        profile_url: Some("https://github.test/octocat".into()),
    }
}

// ============================================================================
// Recording avatar service
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarCall {
    Url(Uuid, String),
    Gravatar(Uuid, String),
}

#[derive(Default)]
pub struct RecordingAvatars {
    calls: Mutex<Vec<AvatarCall>>,
}

impl RecordingAvatars {
    pub fn calls(&self) -> Vec<AvatarCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AvatarService for RecordingAvatars {
    async fn update_from_url(&self, user_id: Uuid, url: &str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(AvatarCall::Url(user_id, url.to_string()));
        Ok(())
    }

    async fn update_from_gravatar(&self, user_id: Uuid, email: &str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(AvatarCall::Gravatar(user_id, email.to_string()));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub store: MemoryStore,
    pub service: HandshakeService,
    pub provider: Arc<ScriptedProvider>,
    /// A second configured provider, for cross-provider callbacks.
    pub second_provider: Arc<ScriptedProvider>,
    pub avatars: Arc<RecordingAvatars>,
}

pub struct HarnessOptions {
    pub settings: HandshakeSettings,
    pub instance_federated_signup: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            settings: HandshakeSettings::default(),
            instance_federated_signup: true,
        }
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_options(HarnessOptions::default()).await
    }

    pub async fn with_options(options: HarnessOptions) -> Self {
        let store = MemoryStore::new();
        store.insert_domain(sso_domain(SSO_HOST)).await;

        let provider = Arc::new(ScriptedProvider::new(OAUTH_PROVIDER, octocat()));
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        let second_provider = Arc::new(ScriptedProvider::new(
            SECOND_OAUTH_PROVIDER,
            FederatedUser {
                external_id: "gl-42".into(),
                ..octocat()
            },
        ));
        registry.register(second_provider.clone());

        let avatars = Arc::new(RecordingAvatars::default());
        let store_arc = Arc::new(store.clone());

        let service = HandshakeService::new(HandshakeDeps {
            tokens: store_arc.clone(),
            sessions: store_arc.clone(),
            domains: store_arc.clone(),
            directory: store_arc,
            registry,
            signup: Arc::new(ConfiguredSignupPolicy {
                instance_federated_signup: options.instance_federated_signup,
            }),
            verifier: Arc::new(DefaultVerifier),
            avatars: avatars.clone(),
            tasks: BackgroundTasks::new(Duration::from_secs(5)),
            settings: options.settings,
        });

        Self {
            store,
            service,
            provider,
            second_provider,
            avatars,
        }
    }

    pub async fn domain(&self, host: &str) -> Domain {
        use login_service::services::DomainStore;
        self.store.find_by_host(host).await.unwrap().unwrap()
    }

    pub async fn sso_init(&self) -> InitResponse {
        self.service
            .init(InitRequest {
                provider: "sso".into(),
                host: Some(SSO_HOST.into()),
                token: None,
            })
            .await
            .expect("sso init")
    }

    pub async fn sso_callback(&self, cookie: &str, payload: &str, hmac: &str) -> CallbackOutcome {
        self.service
            .callback(CallbackRequest {
                provider: "sso".into(),
                session_cookie: Some(cookie.to_string()),
                params: CallbackParams {
                    payload: Some(payload.to_string()),
                    hmac: Some(hmac.to_string()),
                    ..Default::default()
                },
                client: client(),
            })
            .await
    }

    /// Init then callback with a correctly signed payload built from `fields`
    /// plus the issued token.
    pub async fn sso_login(&self, fields: serde_json::Value) -> CallbackOutcome {
        let init = self.sso_init().await;
        let token = query_param(&init.redirect_url, "token").unwrap();
        let (payload, hmac) = signed_payload(&with_token(fields, &token));
        self.sso_callback(&init.session_id.to_string(), &payload, &hmac).await
    }

    pub async fn oauth_init(&self, host: Option<&str>) -> InitResponse {
        self.service
            .init(InitRequest {
                provider: OAUTH_PROVIDER.into(),
                host: host.map(String::from),
                token: None,
            })
            .await
            .expect("oauth init")
    }

    pub async fn oauth_callback(&self, init: &InitResponse, params: CallbackParams) -> CallbackOutcome {
        self.service
            .callback(CallbackRequest {
                provider: OAUTH_PROVIDER.into(),
                session_cookie: Some(init.session_id.to_string()),
                params,
                client: client(),
            })
            .await
    }

    /// Init then callback echoing the issued state with [`GOOD_CODE`].
    pub async fn oauth_login(&self, host: Option<&str>) -> CallbackOutcome {
        let init = self.oauth_init(host).await;
        let state = query_param(&init.redirect_url, "state").unwrap();
        self.oauth_callback(
            &init,
            CallbackParams {
                state: Some(state),
                code: Some(GOOD_CODE.into()),
                ..Default::default()
            },
        )
        .await
    }
}

pub fn client() -> ClientInfo {
    ClientInfo {
        ip: Some("203.0.113.77".parse().unwrap()),
        country: Some("DE".into()),
    }
}

pub fn sso_domain(host: &str) -> Domain {
    let mut domain = Domain::new(host);
    domain.auth_sso = true;
    domain.sso_url = format!("https://{}/sso/login", host);
    domain.sso_secret = Some(hex::encode(SSO_SECRET));
    domain
}

pub fn with_token(mut fields: serde_json::Value, token: &str) -> serde_json::Value {
    fields["token"] = serde_json::Value::String(token.to_string());
    fields
}

/// Hex payload and hex HMAC over its raw bytes, as the site's backend would
/// produce them.
pub fn signed_payload(body: &serde_json::Value) -> (String, String) {
    let raw = serde_json::to_vec(body).unwrap();
    let hmac = signature::sign_hex(&raw, &SSO_SECRET).unwrap();
    (hex::encode(raw), hmac)
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Flip the last hex digit of `hex`.
pub fn tamper(hex: &str) -> String {
    let mut chars: Vec<char> = hex.chars().collect();
    let last = chars.last_mut().unwrap();
    *last = if *last == '0' { '1' } else { '0' };
    chars.into_iter().collect()
}

pub fn test_config() -> AuthConfig {
    AuthConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "login-service".into(),
        service_version: "test".into(),
        log_level: "info".into(),
        otlp_endpoint: None,
        base_url: "http://localhost:8080".into(),
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 1,
            min_connections: 0,
        },
        session_store: SessionStoreConfig::Postgres,
        handshake: HandshakeConfig {
            auth_session_ttl_minutes: 15,
            login_token_ttl_minutes: 15,
            avatar_fetch_timeout_seconds: 5,
            http_client_timeout_seconds: 5,
            use_gravatar: false,
            log_full_ips: false,
            federated_signup_enabled: true,
            country_header: Some("cf-ipcountry".into()),
        },
        oauth: Vec::new(),
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".into()],
        },
    }
}

pub fn app_state(harness: &Harness) -> AppState {
    AppState {
        config: test_config(),
        handshake: harness.service.clone(),
        sessions: Arc::new(harness.store.clone()),
        db: None,
    }
}
