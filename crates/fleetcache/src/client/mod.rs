//! Typed access to the remote store by connection id.
//!
//! Accessors never fail on a miss: reads fall back to [`CacheValue::Absent`]
//! or the caller's default, writes log and carry on. The `try_*` variants
//! and script reads return the error instead.
//!
//! Hash and set writes re-apply the connection's default TTL in the same
//! pipeline as the write, so a key that keeps being written keeps living.

mod hash;
mod keys;
mod list;
mod scalar;
mod set;

use std::sync::Arc;
use std::time::Duration;

use fleetcache_core::CompressionCodec;
use redis::{Cmd, FromRedisValue, Value};

use crate::error::{CacheError, timed};
use crate::pipeline::Batch;
use crate::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::script::ScriptCache;
use crate::value::CacheValue;

pub use hash::HashItem;
pub use keys::scan_all;

/// `SCAN ... COUNT` hint.
pub const SCAN_BATCH: usize = 1000;

#[derive(Clone)]
pub struct CacheClient {
    registry: Arc<ConnectionRegistry>,
    codec: Arc<CompressionCodec>,
    scripts: Arc<ScriptCache>,
}

impl CacheClient {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        codec: Arc<CompressionCodec>,
        scripts: Arc<ScriptCache>,
    ) -> Self {
        Self {
            registry,
            codec,
            scripts,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn codec(&self) -> &CompressionCodec {
        &self.codec
    }

    pub fn scripts(&self) -> &ScriptCache {
        &self.scripts
    }

    fn connection(&self, id: ConnectionId) -> Result<Arc<Connection>, CacheError> {
        self.registry
            .resolve(id)
            .ok_or(CacheError::UnknownConnection(id))
    }

    /// Default TTL of `id`; zero for unknown connections.
    pub fn default_ttl(&self, id: ConnectionId) -> Duration {
        self.registry
            .resolve(id)
            .map(|c| c.default_ttl())
            .unwrap_or_default()
    }

    /// Run one command on `id`.
    pub async fn query<T: FromRedisValue>(&self, id: ConnectionId, cmd: &Cmd) -> Result<T, CacheError> {
        let connection = self.connection(id)?;
        let mut conn = connection.get().await?;
        timed(connection.timeout(), cmd.query_async(&mut conn)).await
    }

    /// Run a read; errors are logged and read as absent.
    async fn read(&self, id: ConnectionId, cmd: &Cmd, key: &str) -> CacheValue {
        let reply: Result<Value, CacheError> = self.query(id, cmd).await;
        match reply {
            Ok(value) => CacheValue::from(value),
            Err(e) => {
                tracing::warn!(conn = id, key, error = %e, "cache read failed");
                CacheValue::Absent
            }
        }
    }

    /// Run a read returning raw reply; errors are logged and read as `Nil`.
    async fn read_raw(&self, id: ConnectionId, cmd: &Cmd, key: &str) -> Value {
        let reply: Result<Value, CacheError> = self.query(id, cmd).await;
        reply.unwrap_or_else(|e| {
            tracing::warn!(conn = id, key, error = %e, "cache read failed");
            Value::Nil
        })
    }

    /// Run a write, logging failures.
    async fn write(&self, id: ConnectionId, cmd: &Cmd, key: &str) {
        let reply: Result<Value, CacheError> = self.query(id, cmd).await;
        if let Err(e) = reply {
            tracing::warn!(conn = id, key, error = %e, "cache write failed");
        }
    }

    /// Write `cmd` and re-apply the default TTL to `key` in one round trip.
    async fn write_touched(&self, id: ConnectionId, cmd: Cmd, key: &str) -> Result<(), CacheError> {
        let mut batch = Batch::with_capacity(2);
        batch.push(cmd).expire(key, self.default_ttl(id));
        self.apply(id, &batch).await
    }

    /// Run a batch of reads; one reply per command, `Nil` for failures.
    pub async fn fetch(&self, id: ConnectionId, batch: &Batch) -> Vec<Value> {
        let connection = match self.connection(id) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(conn = id, error = %e, "batch read skipped");
                return vec![Value::Nil; batch.len()];
            }
        };
        match connection.get().await {
            Ok(mut conn) => batch.fetch(&mut conn, connection.timeout()).await,
            Err(e) => {
                tracing::warn!(conn = id, error = %e, "batch read skipped");
                vec![Value::Nil; batch.len()]
            }
        }
    }

    /// Run a batch of writes.
    pub async fn apply(&self, id: ConnectionId, batch: &Batch) -> Result<(), CacheError> {
        if batch.is_empty() {
            return Ok(());
        }
        let connection = self.connection(id)?;
        let mut conn = connection.get().await?;
        batch.apply(&mut conn, connection.timeout()).await
    }

    /// [`apply`](Self::apply), logging instead of returning the error.
    async fn apply_logged(&self, id: ConnectionId, batch: &Batch, op: &'static str) {
        if let Err(e) = self.apply(id, batch).await {
            tracing::warn!(conn = id, op, commands = batch.len(), error = %e, "cache batch write failed");
        }
    }

    fn compress<'a>(&self, bytes: &'a [u8]) -> std::borrow::Cow<'a, [u8]> {
        self.codec.compress(bytes)
    }

    fn decompress(&self, value: CacheValue) -> CacheValue {
        value.map_bytes(|bytes| self.codec.decompress(&bytes).into_owned())
    }
}

fn cmd_with_key(name: &str, key: &str) -> Cmd {
    let mut cmd = redis::cmd(name);
    cmd.arg(key);
    cmd
}
