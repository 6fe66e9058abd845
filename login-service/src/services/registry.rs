//! Lookup from provider id to what can authenticate with it.

use std::collections::HashMap;
use std::sync::Arc;

use super::oauth::{self, OAuth2Provider, OAuthProvider};
use crate::config::OAuthCredentials;

/// Pseudo-provider id selecting domain SSO.
pub const SSO_PROVIDER_ID: &str = "sso";

pub enum ProviderLookup {
    Unknown,
    /// A provider we know of but have no credentials for.
    NotConfigured,
    OAuth(Arc<dyn OAuthProvider>),
    Sso,
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`OAuth2Provider`] per known preset with credentials.
    pub fn from_credentials(
        credentials: &[OAuthCredentials],
        base_url: &str,
        http: reqwest::Client,
    ) -> Self {
        let mut registry = Self::new();
        for cred in credentials {
            match oauth::preset(&cred.provider) {
                Some(preset) => {
                    registry.register(Arc::new(OAuth2Provider::new(
                        preset,
                        cred.client_id.clone(),
                        cred.client_secret.clone(),
                        base_url,
                        http.clone(),
                    )));
                    tracing::info!(provider = preset.id, "OAuth provider configured");
                }
                None => tracing::warn!(provider = %cred.provider, "Ignoring credentials for unknown provider"),
            }
        }
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn lookup(&self, id: &str) -> ProviderLookup {
        if id == SSO_PROVIDER_ID {
            return ProviderLookup::Sso;
        }
        if let Some(provider) = self.providers.get(id) {
            return ProviderLookup::OAuth(provider.clone());
        }
        if oauth::preset(id).is_some() {
            ProviderLookup::NotConfigured
        } else {
            ProviderLookup::Unknown
        }
    }

    pub fn configured_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
