use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use uuid::Uuid;

use super::store::AuthSessionStore;
use crate::models::AuthSession;

const KEY_PREFIX: &str = "auth_session:";

/// Auth sessions in Redis. Expiry is left to Redis via `EX`.
#[derive(Clone)]
pub struct RedisAuthSessionStore {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisAuthSessionStore {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }

    fn key(id: Uuid) -> String {
        format!("{}{}", KEY_PREFIX, id)
    }
}

#[async_trait]
impl AuthSessionStore for RedisAuthSessionStore {
    async fn create(&self, session: &AuthSession) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let value = serde_json::to_string(session)?;
        let ttl = session.remaining_seconds().max(1);

        let stored: Option<String> = redis::cmd("SET")
            .arg(Self::key(session.id))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to store auth session: {}", e))?;

        match stored {
            Some(_) => Ok(()),
            None => anyhow::bail!("auth session {} already exists", session.id),
        }
    }

    /// `GETDEL` reads and removes the key in one step.
    async fn take(&self, id: Uuid) -> Result<Option<AuthSession>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(Self::key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to take auth session: {}", e))?;

        value
            .map(|v| serde_json::from_str(&v))
            .transpose()
            .map_err(|e| anyhow::anyhow!("Corrupt auth session {}: {}", id, e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let id = Uuid::nil();
        assert_eq!(
            RedisAuthSessionStore::key(id),
            "auth_session:00000000-0000-0000-0000-000000000000"
        );
    }
}
