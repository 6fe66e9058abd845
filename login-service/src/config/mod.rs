use secrecy::SecretString;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::services::oauth::PRESETS;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Public base URL of this service, used for OAuth redirect URIs.
    pub base_url: String,
    pub database: DatabaseConfig,
    pub session_store: SessionStoreConfig,
    pub handshake: HandshakeConfig,
    pub oauth: Vec<OAuthCredentials>,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStoreConfig {
    Postgres,
    Redis { url: String },
}

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub auth_session_ttl_minutes: i64,
    pub login_token_ttl_minutes: i64,
    pub avatar_fetch_timeout_seconds: u64,
    pub http_client_timeout_seconds: u64,
    pub use_gravatar: bool,
    pub log_full_ips: bool,
    pub federated_signup_enabled: bool,
    /// Request header carrying the visitor's country, e.g. `CF-IPCountry`.
    pub country_header: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub provider: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl SessionStoreConfig {
    pub fn name(&self) -> &'static str {
        match self {
            SessionStoreConfig::Postgres => "postgres",
            SessionStoreConfig::Redis { .. } => "redis",
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let session_store = match get_env("AUTH_SESSION_STORE", Some("postgres"), false)?
            .to_lowercase()
            .as_str()
        {
            "postgres" => SessionStoreConfig::Postgres,
            "redis" => SessionStoreConfig::Redis {
                url: get_env("REDIS_URL", None, false)?,
            },
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Invalid AUTH_SESSION_STORE: {}",
                    other
                )))
            }
        };

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("login-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: optional_env("OTLP_ENDPOINT"),
            base_url: get_env("BASE_URL", Some("http://localhost:8080"), is_prod)?
                .trim_end_matches('/')
                .to_string(),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1")?,
            },
            session_store,
            handshake: HandshakeConfig {
                auth_session_ttl_minutes: parse_env("AUTH_SESSION_TTL_MINUTES", "15")?,
                login_token_ttl_minutes: parse_env("LOGIN_TOKEN_TTL_MINUTES", "15")?,
                avatar_fetch_timeout_seconds: parse_env("AVATAR_FETCH_TIMEOUT_SECONDS", "10")?,
                http_client_timeout_seconds: parse_env("HTTP_CLIENT_TIMEOUT_SECONDS", "10")?,
                use_gravatar: parse_env("USE_GRAVATAR", "false")?,
                log_full_ips: parse_env("LOG_FULL_IPS", "false")?,
                federated_signup_enabled: parse_env("FEDERATED_SIGNUP_ENABLED", "true")?,
                country_header: optional_env("COUNTRY_HEADER"),
            },
            oauth: oauth_credentials(),
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.handshake.auth_session_ttl_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUTH_SESSION_TTL_MINUTES must be positive"
            )));
        }

        if self.handshake.login_token_ttl_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LOGIN_TOKEN_TTL_MINUTES must be positive"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS exceeds DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if !self.secure_cookies() {
                tracing::error!("BASE_URL is not HTTPS in production; auth cookies will not be Secure");
            }
        }

        Ok(())
    }

    /// Cookies get the `Secure` flag when the service is served over HTTPS.
    pub fn secure_cookies(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

/// `OAUTH_<PROVIDER>_KEY` / `OAUTH_<PROVIDER>_SECRET` for every known
/// provider. A provider missing either half is left unconfigured.
fn oauth_credentials() -> Vec<OAuthCredentials> {
    PRESETS
        .iter()
        .filter_map(|preset| {
            let prefix = format!("OAUTH_{}", preset.id.to_uppercase());
            let client_id = optional_env(&format!("{}_KEY", prefix))?;
            let secret = optional_env(&format!("{}_SECRET", prefix))?;
            Some(OAuthCredentials {
                provider: preset.id.to_string(),
                client_id,
                client_secret: SecretString::new(secret),
            })
        })
        .collect()
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), false)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_get_env_defaults() {
        assert_eq!(
            get_env("LOGIN_SERVICE_TEST_UNSET_VAR", Some("fallback"), false).unwrap(),
            "fallback"
        );
        assert!(get_env("LOGIN_SERVICE_TEST_UNSET_VAR", Some("fallback"), true).is_err());
        assert!(get_env("LOGIN_SERVICE_TEST_UNSET_VAR", None, false).is_err());
    }

    #[test]
    fn test_parse_env_default() {
        let ttl: i64 = parse_env("LOGIN_SERVICE_TEST_UNSET_TTL", "15").unwrap();
        assert_eq!(ttl, 15);
        let flag: bool = parse_env("LOGIN_SERVICE_TEST_UNSET_FLAG", "false").unwrap();
        assert!(!flag);
    }
}
