//! Services layer for login-service.
//!
//! The handshake orchestrator, the identity-resolution rules it applies, and
//! the stores and providers it talks to.

pub mod avatar;
mod database;
pub mod error;
pub mod federation;
pub mod handshake;
pub mod identity;
pub mod memory;
pub mod metrics;
pub mod oauth;
pub mod redis;
pub mod registry;
pub mod signup_policy;
pub mod sso;
pub mod store;
pub mod token;
pub mod verifier;

pub use avatar::{AvatarService, AvatarStore, HttpAvatarService};
pub use database::Database;
pub use error::AuthError;
pub use federation::CallbackParams;
pub use handshake::{
    CallbackOutcome, CallbackRequest, ClientInfo, CookieSameSite, HandshakeDeps, HandshakeService,
    HandshakeSettings, InitRequest, InitResponse, LoginResult, ResponseMode,
};
pub use memory::MemoryStore;
pub use oauth::{OAuthProvider, OAuthSession, OAuthTokens};
pub use self::redis::RedisAuthSessionStore;
pub use registry::{ProviderLookup, ProviderRegistry, SSO_PROVIDER_ID};
pub use signup_policy::{ConfiguredSignupPolicy, SignupKind, SignupPolicy};
pub use store::{AuthSessionStore, DirectoryTransaction, DomainStore, TokenStore, UserDirectory};
pub use verifier::{DefaultVerifier, SsoConfig, Verifier};
