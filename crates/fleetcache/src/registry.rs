//! Connection registry.
//!
//! One pool per connection id, created on registration and owned by the
//! registry. Reconnection is left to the pool and the Redis client: a broken
//! connection is dropped on recycle and a fresh one is opened on the next
//! checkout.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::{Pool, PoolConfig, Runtime};
use parking_lot::RwLock;

use crate::config::ConnectionConfig;
use crate::error::{CacheError, timed};

/// Caller-chosen small integer naming one remote store.
pub type ConnectionId = u32;

/// How to reach one remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// `host:port` or a full `redis://` / `rediss://` URL
    pub address: String,
    pub db: i64,
    /// Per-operation timeout
    pub timeout: Duration,
    /// TTL applied by writes that do not take an explicit one
    pub default_ttl: Duration,
    pub pool_size: usize,
}

impl ConnectionSettings {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            db: 0,
            timeout: Duration::from_secs(5),
            default_ttl: Duration::from_secs(600),
            pool_size: 16,
        }
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Connection URL; bare `host:port` addresses get the db as path.
    pub fn url(&self) -> String {
        redis_url(&self.address, self.db)
    }
}

pub(crate) fn redis_url(address: &str, db: i64) -> String {
    let address = address.trim();
    if address.contains("://") {
        address.to_string()
    } else {
        format!("redis://{address}/{db}")
    }
}

/// Build a pool for `url` with every pool timeout set to `timeout`.
pub(crate) fn create_pool(url: &str, size: usize, timeout: Duration) -> Result<Pool, CacheError> {
    let mut redis_config = deadpool_redis::Config::from_url(url);
    let mut pool_config = PoolConfig::new(size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| CacheError::Config(e.to_string()))
}

/// A registered remote store.
pub struct Connection {
    id: ConnectionId,
    settings: ConnectionSettings,
    pool: Pool,
}

impl Connection {
    pub fn open(id: ConnectionId, settings: ConnectionSettings) -> Result<Self, CacheError> {
        if settings.address.trim().is_empty() {
            return Err(CacheError::Config(format!("connection {id}: empty address")));
        }
        if settings.pool_size == 0 {
            return Err(CacheError::Config(format!("connection {id}: pool size must be > 0")));
        }
        let pool = create_pool(&settings.url(), settings.pool_size, settings.timeout)?;
        Ok(Self { id, settings, pool })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    pub fn default_ttl(&self) -> Duration {
        self.settings.default_ttl
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Check out a pooled connection.
    pub async fn get(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))
    }

    /// Round-trip a PING.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.get().await?;
        let _pong: String = timed(self.settings.timeout, redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.settings.address)
            .field("db", &self.settings.db)
            .finish_non_exhaustive()
    }
}

/// Connection id → live pool.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a pool for `id`, replacing any previous registration.
    pub fn register(
        &self,
        id: ConnectionId,
        settings: ConnectionSettings,
    ) -> Result<Arc<Connection>, CacheError> {
        let connection = Arc::new(Connection::open(id, settings)?);
        let previous = self.connections.write().insert(id, connection.clone());
        if previous.is_some() {
            tracing::info!(conn = id, address = %connection.settings.address, "connection re-registered");
        } else {
            tracing::info!(conn = id, address = %connection.settings.address, "connection registered");
        }
        Ok(connection)
    }

    pub fn register_all(&self, configs: &[ConnectionConfig]) -> Result<(), CacheError> {
        for cfg in configs {
            self.register(cfg.id, cfg.settings())?;
        }
        Ok(())
    }

    pub fn resolve(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_addresses_become_urls_with_db() {
        assert_eq!(redis_url("127.0.0.1:6379", 0), "redis://127.0.0.1:6379/0");
        assert_eq!(redis_url(" cache:6380 ", 3), "redis://cache:6380/3");
        assert_eq!(redis_url("redis://cache:6379/2", 5), "redis://cache:6379/2");
        assert_eq!(redis_url("rediss://cache:6379", 0), "rediss://cache:6379");
    }

    #[tokio::test]
    async fn register_and_resolve() {
        let registry = ConnectionRegistry::new();
        assert!(registry.resolve(1).is_none());

        registry
            .register(1, ConnectionSettings::new("127.0.0.1:6379"))
            .unwrap();
        let conn = registry.resolve(1).unwrap();
        assert_eq!(conn.id(), 1);
        assert_eq!(conn.settings().url(), "redis://127.0.0.1:6379/0");
        assert_eq!(registry.ids(), vec![1]);
    }

    #[tokio::test]
    async fn re_registration_replaces_previous_handle() {
        let registry = ConnectionRegistry::new();
        registry
            .register(7, ConnectionSettings::new("127.0.0.1:6379"))
            .unwrap();
        registry
            .register(7, ConnectionSettings::new("127.0.0.1:6380").with_db(2))
            .unwrap();

        assert_eq!(registry.len(), 1);
        let conn = registry.resolve(7).unwrap();
        assert_eq!(conn.settings().address, "127.0.0.1:6380");
        assert_eq!(conn.settings().db, 2);
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let registry = ConnectionRegistry::new();
        let err = registry
            .register(1, ConnectionSettings::new("  "))
            .unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));

        let err = registry
            .register(1, ConnectionSettings::new("127.0.0.1:6379").with_pool_size(0))
            .unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn ids_are_sorted() {
        let registry = ConnectionRegistry::new();
        for id in [5, 1, 3] {
            registry
                .register(id, ConnectionSettings::new("127.0.0.1:6379"))
                .unwrap();
        }
        assert_eq!(registry.ids(), vec![1, 3, 5]);
    }
}
