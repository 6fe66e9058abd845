//! In-process implementation of every store, used by tests and local runs
//! without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::avatar::AvatarStore;
use super::store::{AuthSessionStore, DirectoryTransaction, DomainStore, TokenStore, UserDirectory};
use crate::models::{
    AuthMode, AuthSession, Domain, DomainRole, DomainUser, Token, TokenScope, User, ANONYMOUS_USER_ID,
};

#[derive(Debug, Clone, Default)]
struct MemoryData {
    tokens: HashMap<String, Token>,
    users: HashMap<Uuid, User>,
    domain_users: HashMap<(Uuid, Uuid), DomainUser>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<MemoryData>>,
    sessions: Arc<Mutex<HashMap<Uuid, AuthSession>>>,
    domains: Arc<RwLock<HashMap<String, Domain>>>,
    avatars: Arc<Mutex<HashMap<Uuid, (String, Vec<u8>)>>>,
    fail_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_domain(&self, domain: Domain) {
        self.domains.write().await.insert(domain.host.clone(), domain);
    }

    pub async fn insert_user(&self, user: User) {
        self.data.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_token(&self, token: Token) {
        self.data.lock().await.tokens.insert(token.value.clone(), token);
    }

    pub async fn users(&self) -> Vec<User> {
        self.data.lock().await.users.values().cloned().collect()
    }

    pub async fn domain_users(&self) -> Vec<DomainUser> {
        self.data.lock().await.domain_users.values().cloned().collect()
    }

    pub async fn token(&self, value: &str) -> Option<Token> {
        self.data.lock().await.tokens.get(value).cloned()
    }

    pub async fn avatar(&self, user_id: Uuid) -> Option<(String, Vec<u8>)> {
        self.avatars.lock().await.get(&user_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Make every following commit fail, to exercise rollback paths.
    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn issue_anonymous(
        &self,
        scope: TokenScope,
        ttl: Duration,
        multiuse: bool,
    ) -> anyhow::Result<Token> {
        let token = Token::new_anonymous(scope, ttl, multiuse);
        self.insert_token(token.clone()).await;
        Ok(token)
    }

    async fn find_by_value(
        &self,
        value: &str,
        consume_if_single_use: bool,
    ) -> anyhow::Result<Option<Token>> {
        let mut data = self.data.lock().await;
        let single_use = matches!(data.tokens.get(value), Some(t) if !t.multiuse);
        if consume_if_single_use && single_use {
            return Ok(data.tokens.remove(value));
        }
        Ok(data.tokens.get(value).cloned())
    }
}

#[async_trait]
impl AuthSessionStore for MemoryStore {
    async fn create(&self, session: &AuthSession) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.id) {
            anyhow::bail!("auth session {} already exists", session.id);
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn take(&self, id: Uuid) -> anyhow::Result<Option<AuthSession>> {
        Ok(self.sessions.lock().await.remove(&id))
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl DomainStore for MemoryStore {
    async fn find_by_host(&self, host: &str) -> anyhow::Result<Option<Domain>> {
        Ok(self.domains.read().await.get(host).cloned())
    }
}

#[async_trait]
impl AvatarStore for MemoryStore {
    async fn save_avatar(&self, user_id: Uuid, content_type: &str, data: &[u8]) -> anyhow::Result<()> {
        self.avatars
            .lock()
            .await
            .insert(user_id, (content_type.to_string(), data.to_vec()));
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn DirectoryTransaction>> {
        let guard = self.data.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            work,
            fail_commit: self.fail_commit.load(Ordering::SeqCst),
        }))
    }
}

/// Holds the store lock for its whole life, so transactions are serialized.
/// Changes land on a working copy and replace the shared data on commit.
struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryData>,
    work: MemoryData,
    fail_commit: bool,
}

#[async_trait]
impl DirectoryTransaction for MemoryTransaction {
    async fn find_user_by_federated_id(
        &mut self,
        mode: AuthMode<'_>,
        federated_id: &str,
    ) -> anyhow::Result<Option<User>> {
        if matches!(mode, AuthMode::Local) {
            return Ok(None);
        }
        Ok(self
            .work
            .users
            .values()
            .find(|u| u.federated_id == federated_id && u.auth_mode() == mode)
            .cloned())
    }

    async fn find_user_by_email(&mut self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .work
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_user(&mut self, user: &User) -> anyhow::Result<()> {
        if self.work.users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            anyhow::bail!("duplicate email {}", user.email);
        }
        self.work.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> anyhow::Result<()> {
        let clash = self
            .work
            .users
            .values()
            .any(|u| u.id != user.id && u.email.eq_ignore_ascii_case(&user.email));
        if clash {
            anyhow::bail!("duplicate email {}", user.email);
        }
        match self.work.users.get_mut(&user.id) {
            Some(stored) => {
                *stored = user.clone();
                Ok(())
            }
            None => anyhow::bail!("user {} not found", user.id),
        }
    }

    async fn rebind_token(&mut self, value: &str, owner: Uuid) -> anyhow::Result<bool> {
        match self.work.tokens.get_mut(value) {
            Some(token) if token.owner == ANONYMOUS_USER_ID => {
                token.owner = owner;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_or_create_domain_user(
        &mut self,
        domain_id: Uuid,
        user_id: Uuid,
        default_role: DomainRole,
    ) -> anyhow::Result<(DomainUser, bool)> {
        if let Some(existing) = self.work.domain_users.get(&(domain_id, user_id)) {
            return Ok((existing.clone(), false));
        }
        let created = DomainUser::new(domain_id, user_id, default_role);
        self.work
            .domain_users
            .insert((domain_id, user_id), created.clone());
        Ok((created, true))
    }

    async fn update_domain_user_role(
        &mut self,
        domain_id: Uuid,
        user_id: Uuid,
        role: DomainRole,
    ) -> anyhow::Result<()> {
        match self.work.domain_users.get_mut(&(domain_id, user_id)) {
            Some(binding) => {
                binding.role = role;
                Ok(())
            }
            None => anyhow::bail!("domain user {}/{} not found", domain_id, user_id),
        }
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let MemoryTransaction {
            mut guard,
            work,
            fail_commit,
        } = *self;
        if fail_commit {
            anyhow::bail!("commit failed");
        }
        *guard = work;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_take_is_at_most_once() {
        let store = MemoryStore::new();
        let session = AuthSession::new("github".into(), "ab".repeat(32), String::new(), String::new(), Duration::minutes(15));
        store.create(&session).await.unwrap();

        assert_eq!(store.take(session.id).await.unwrap(), Some(session.clone()));
        assert_eq!(store.take(session.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_single_use_token_consumption() {
        let store = MemoryStore::new();
        let single = store.issue_anonymous(TokenScope::Login, Duration::minutes(5), false).await.unwrap();
        let multi = store.issue_anonymous(TokenScope::Login, Duration::minutes(5), true).await.unwrap();

        assert!(store.find_by_value(&single.value, false).await.unwrap().is_some());
        assert!(store.find_by_value(&single.value, true).await.unwrap().is_some());
        assert!(store.find_by_value(&single.value, true).await.unwrap().is_none());

        assert!(store.find_by_value(&multi.value, true).await.unwrap().is_some());
        assert!(store.find_by_value(&multi.value, true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            let user = User::new_federated("a@x.com".into(), "A".into(), AuthMode::Sso, "a@x.com".into());
            tx.create_user(&user).await.unwrap();
        }
        assert!(store.users().await.is_empty());

        let mut tx = store.begin().await.unwrap();
        let user = User::new_federated("a@x.com".into(), "A".into(), AuthMode::Sso, "a@x.com".into());
        tx.create_user(&user).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.users().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rebind_only_from_anonymous() {
        let store = MemoryStore::new();
        let token = store.issue_anonymous(TokenScope::Login, Duration::minutes(5), false).await.unwrap();
        let mut tx = store.begin().await.unwrap();

        assert!(tx.rebind_token(&token.value, Uuid::new_v4()).await.unwrap());
        assert!(!tx.rebind_token(&token.value, Uuid::new_v4()).await.unwrap());
        assert!(!tx.rebind_token("missing", Uuid::new_v4()).await.unwrap());
    }
}
