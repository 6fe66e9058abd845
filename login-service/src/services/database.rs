//! PostgreSQL implementation of the stores.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Duration;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

use super::avatar::AvatarStore;
use super::store::{AuthSessionStore, DirectoryTransaction, DomainStore, TokenStore, UserDirectory};
use crate::models::{
    AuthMode, AuthSession, Domain, DomainRole, DomainUser, Token, TokenScope, User, ANONYMOUS_USER_ID,
};

const USER_COLUMNS: &str = "id, email, name, password_hash, federated_idp, federated_sso, federated_id, \
     website_url, confirmed, confirmed_at, banned, locked, signup_ip, signup_country, signup_host, \
     created_at, last_login_at";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(database_url), fields(service = "login-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .idle_timeout(std::time::Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Remove auth sessions and tokens past their expiry. Returns the
    /// number of (sessions, tokens) deleted.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self) -> Result<(u64, u64), AppError> {
        let sessions = sqlx::query("DELETE FROM auth_sessions WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?
            .rows_affected();
        let tokens = sqlx::query("DELETE FROM tokens WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok((sessions, tokens))
    }

    pub async fn insert_domain(&self, domain: &Domain) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO domains (id, host, auth_sso, sso_url, sso_secret, sso_non_interactive,
                                 sso_signup_enabled, federated_signup_enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(domain.id)
        .bind(&domain.host)
        .bind(domain.auth_sso)
        .bind(&domain.sso_url)
        .bind(&domain.sso_secret)
        .bind(domain.sso_non_interactive)
        .bind(domain.sso_signup_enabled)
        .bind(domain.federated_signup_enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Tokens
// -------------------------------------------------------------------------

#[async_trait]
impl TokenStore for Database {
    async fn issue_anonymous(
        &self,
        scope: TokenScope,
        ttl: Duration,
        multiuse: bool,
    ) -> anyhow::Result<Token> {
        let token = Token::new_anonymous(scope, ttl, multiuse);
        sqlx::query(
            "INSERT INTO tokens (value, owner, scope, expires_at, multiuse) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&token.value)
        .bind(token.owner)
        .bind(token.scope)
        .bind(token.expires_at)
        .bind(token.multiuse)
        .execute(&self.pool)
        .await
        .context("failed to insert token")?;
        Ok(token)
    }

    async fn find_by_value(
        &self,
        value: &str,
        consume_if_single_use: bool,
    ) -> anyhow::Result<Option<Token>> {
        if consume_if_single_use {
            let consumed = sqlx::query_as::<_, Token>(
                "DELETE FROM tokens WHERE value = $1 AND NOT multiuse RETURNING *",
            )
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .context("failed to consume token")?;
            if consumed.is_some() {
                return Ok(consumed);
            }
        }

        sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE value = $1")
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch token")
    }
}

// -------------------------------------------------------------------------
// Auth sessions
// -------------------------------------------------------------------------

#[async_trait]
impl AuthSessionStore for Database {
    async fn create(&self, session: &AuthSession) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO auth_sessions (id, provider, token_value, data, host, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id)
        .bind(&session.provider)
        .bind(&session.token_value)
        .bind(&session.data)
        .bind(&session.host)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .context("failed to insert auth session")?;
        Ok(())
    }

    async fn take(&self, id: Uuid) -> anyhow::Result<Option<AuthSession>> {
        sqlx::query_as::<_, AuthSession>("DELETE FROM auth_sessions WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to take auth session")
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Database::health_check(self)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
    }
}

// -------------------------------------------------------------------------
// Domains
// -------------------------------------------------------------------------

#[async_trait]
impl DomainStore for Database {
    async fn find_by_host(&self, host: &str) -> anyhow::Result<Option<Domain>> {
        sqlx::query_as::<_, Domain>(
            r#"
            SELECT id, host, auth_sso, sso_url, sso_secret, sso_non_interactive,
                   sso_signup_enabled, federated_signup_enabled
            FROM domains WHERE host = $1
            "#,
        )
        .bind(host)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch domain")
    }
}

// -------------------------------------------------------------------------
// Avatars
// -------------------------------------------------------------------------

#[async_trait]
impl AvatarStore for Database {
    async fn save_avatar(&self, user_id: Uuid, content_type: &str, data: &[u8]) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_avatars (user_id, content_type, data, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET content_type = EXCLUDED.content_type, data = EXCLUDED.data, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(content_type)
        .bind(data)
        .execute(&self.pool)
        .await
        .context("failed to store avatar")?;
        Ok(())
    }
}

// -------------------------------------------------------------------------
// User directory
// -------------------------------------------------------------------------

#[async_trait]
impl UserDirectory for Database {
    async fn begin(&self) -> anyhow::Result<Box<dyn DirectoryTransaction>> {
        let tx = self.pool.begin().await.context("failed to begin transaction")?;
        Ok(Box::new(PgDirectoryTransaction { tx }))
    }
}

/// Rolled back by sqlx when dropped uncommitted.
struct PgDirectoryTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl DirectoryTransaction for PgDirectoryTransaction {
    async fn find_user_by_federated_id(
        &mut self,
        mode: AuthMode<'_>,
        federated_id: &str,
    ) -> anyhow::Result<Option<User>> {
        let (sql, idp) = match mode {
            AuthMode::Local => return Ok(None),
            AuthMode::Idp(idp) => (
                format!(
                    "SELECT {} FROM users WHERE federated_id = $1 AND federated_idp = $2",
                    USER_COLUMNS
                ),
                Some(idp),
            ),
            AuthMode::Sso => (
                format!(
                    "SELECT {} FROM users WHERE federated_id = $1 AND federated_sso",
                    USER_COLUMNS
                ),
                None,
            ),
        };

        let mut query = sqlx::query_as::<_, User>(&sql).bind(federated_id);
        if let Some(idp) = idp {
            query = query.bind(idp);
        }
        query
            .fetch_optional(&mut *self.tx)
            .await
            .context("failed to find user by federated id")
    }

    async fn find_user_by_email(&mut self, email: &str) -> anyhow::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE lower(email) = lower($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await
        .context("failed to find user by email")
    }

    async fn create_user(&mut self, user: &User) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO users ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            USER_COLUMNS
        ))
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(&user.federated_idp)
        .bind(user.federated_sso)
        .bind(&user.federated_id)
        .bind(&user.website_url)
        .bind(user.confirmed)
        .bind(user.confirmed_at)
        .bind(user.banned)
        .bind(user.locked)
        .bind(&user.signup_ip)
        .bind(&user.signup_country)
        .bind(&user.signup_host)
        .bind(user.created_at)
        .bind(user.last_login_at)
        .execute(&mut *self.tx)
        .await
        .context("failed to insert user")?;
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET email = $2, name = $3, federated_idp = $4, federated_sso = $5,
                federated_id = $6, website_url = $7, last_login_at = $8
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.federated_idp)
        .bind(user.federated_sso)
        .bind(&user.federated_id)
        .bind(&user.website_url)
        .bind(user.last_login_at)
        .execute(&mut *self.tx)
        .await
        .context("failed to update user")?;
        Ok(())
    }

    async fn rebind_token(&mut self, value: &str, owner: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE tokens SET owner = $2 WHERE value = $1 AND owner = $3")
            .bind(value)
            .bind(owner)
            .bind(ANONYMOUS_USER_ID)
            .execute(&mut *self.tx)
            .await
            .context("failed to rebind token")?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_or_create_domain_user(
        &mut self,
        domain_id: Uuid,
        user_id: Uuid,
        default_role: DomainRole,
    ) -> anyhow::Result<(DomainUser, bool)> {
        let created = sqlx::query_as::<_, DomainUser>(
            r#"
            INSERT INTO domain_users (domain_id, user_id, role, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (domain_id, user_id) DO NOTHING
            RETURNING domain_id, user_id, role, created_at
            "#,
        )
        .bind(domain_id)
        .bind(user_id)
        .bind(default_role)
        .fetch_optional(&mut *self.tx)
        .await
        .context("failed to insert domain user")?;

        if let Some(binding) = created {
            return Ok((binding, true));
        }

        let existing = sqlx::query_as::<_, DomainUser>(
            "SELECT domain_id, user_id, role, created_at FROM domain_users WHERE domain_id = $1 AND user_id = $2",
        )
        .bind(domain_id)
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await
        .context("failed to fetch domain user")?;
        Ok((existing, false))
    }

    async fn update_domain_user_role(
        &mut self,
        domain_id: Uuid,
        user_id: Uuid,
        role: DomainRole,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE domain_users SET role = $3 WHERE domain_id = $1 AND user_id = $2")
            .bind(domain_id)
            .bind(user_id)
            .bind(role)
            .execute(&mut *self.tx)
            .await
            .context("failed to update domain user role")?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.tx.commit().await.context("failed to commit transaction")
    }
}
