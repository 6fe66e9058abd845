//! Storage seams used by the handshake.
//!
//! Everything here returns `anyhow::Result`: a store failure is always an
//! internal error from the handshake's point of view. Decisions about
//! missing rows are made by the caller.

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use crate::models::{AuthMode, AuthSession, Domain, DomainRole, DomainUser, Token, TokenScope, User};

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Mint and persist a token owned by the anonymous user.
    async fn issue_anonymous(
        &self,
        scope: TokenScope,
        ttl: Duration,
        multiuse: bool,
    ) -> anyhow::Result<Token>;

    /// Look a token up by value. With `consume_if_single_use`, a single-use
    /// token is deleted in the same operation that returns it.
    async fn find_by_value(
        &self,
        value: &str,
        consume_if_single_use: bool,
    ) -> anyhow::Result<Option<Token>>;
}

#[async_trait]
pub trait AuthSessionStore: Send + Sync {
    async fn create(&self, session: &AuthSession) -> anyhow::Result<()>;

    /// Fetch and delete in one atomic step. At most one caller ever gets
    /// `Some` for a given id.
    async fn take(&self, id: Uuid) -> anyhow::Result<Option<AuthSession>>;

    async fn health_check(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn find_by_host(&self, host: &str) -> anyhow::Result<Option<Domain>>;
}

/// Accounts and domain role bindings. All mutations go through a
/// transaction so a failed callback leaves no trace.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn begin(&self) -> anyhow::Result<Box<dyn DirectoryTransaction>>;
}

/// Unit of work over the user directory. Dropping it without calling
/// [`DirectoryTransaction::commit`] discards every change.
#[async_trait]
pub trait DirectoryTransaction: Send {
    /// Find the account bound to `federated_id` under the given mode.
    /// `AuthMode::Local` never matches.
    async fn find_user_by_federated_id(
        &mut self,
        mode: AuthMode<'_>,
        federated_id: &str,
    ) -> anyhow::Result<Option<User>>;

    /// Case-insensitive email lookup.
    async fn find_user_by_email(&mut self, email: &str) -> anyhow::Result<Option<User>>;

    async fn create_user(&mut self, user: &User) -> anyhow::Result<()>;

    async fn update_user(&mut self, user: &User) -> anyhow::Result<()>;

    /// Hand an anonymous token over to `owner`. Returns `false` when the
    /// token is gone or already owned by someone.
    async fn rebind_token(&mut self, value: &str, owner: Uuid) -> anyhow::Result<bool>;

    /// Returns the binding and whether it was created by this call.
    async fn find_or_create_domain_user(
        &mut self,
        domain_id: Uuid,
        user_id: Uuid,
        default_role: DomainRole,
    ) -> anyhow::Result<(DomainUser, bool)>;

    async fn update_domain_user_role(
        &mut self,
        domain_id: Uuid,
        user_id: Uuid,
        role: DomainRole,
    ) -> anyhow::Result<()>;

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}
