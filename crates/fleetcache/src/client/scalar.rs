use std::time::Duration;

use redis::{Cmd, ToRedisArgs, Value};

use super::{CacheClient, cmd_with_key};
use crate::error::CacheError;
use crate::pipeline::Batch;
use crate::registry::ConnectionId;
use crate::value::CacheValue;

/// `SET key value [PX ttl]`.
fn set_cmd<V: ToRedisArgs>(key: &str, value: V, ttl: Duration) -> Cmd {
    let mut cmd = cmd_with_key("SET", key);
    cmd.arg(value);
    let millis = ttl.as_millis();
    if millis > 0 {
        cmd.arg("PX").arg(u64::try_from(millis).unwrap_or(u64::MAX));
    }
    cmd
}

impl CacheClient {
    pub async fn get(&self, conn: ConnectionId, key: &str) -> CacheValue {
        self.read(conn, &cmd_with_key("GET", key), key).await
    }

    /// [`get`](Self::get) and gunzip when the stored value is compressed.
    pub async fn get_z(&self, conn: ConnectionId, key: &str) -> CacheValue {
        let value = self.get(conn, key).await;
        self.decompress(value)
    }

    pub async fn get_int(&self, conn: ConnectionId, key: &str, default: i64) -> i64 {
        self.get(conn, key).await.parse_or(default)
    }

    pub async fn get_string(&self, conn: ConnectionId, key: &str, default: &str) -> String {
        match self.get(conn, key).await {
            CacheValue::Present(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| default.to_string()),
            CacheValue::Absent => default.to_string(),
        }
    }

    /// Store `value` with the connection's default TTL.
    pub async fn set<V: ToRedisArgs>(&self, conn: ConnectionId, key: &str, value: V) {
        let cmd = set_cmd(key, value, self.default_ttl(conn));
        self.write(conn, &cmd, key).await;
    }

    /// [`set`](Self::set) with the value run through the compression codec.
    pub async fn set_z(&self, conn: ConnectionId, key: &str, value: &[u8]) {
        let packed = self.compress(value);
        self.set(conn, key, packed.as_ref()).await;
    }

    pub async fn set_int(&self, conn: ConnectionId, key: &str, value: i64) {
        self.set(conn, key, value).await;
    }

    /// Store `value` with an explicit TTL; zero means no expiry.
    pub async fn set_with_ttl<V: ToRedisArgs>(&self, conn: ConnectionId, key: &str, value: V, ttl: Duration) {
        let cmd = set_cmd(key, value, ttl);
        self.write(conn, &cmd, key).await;
    }

    pub async fn try_set<V: ToRedisArgs>(&self, conn: ConnectionId, key: &str, value: V) -> Result<(), CacheError> {
        let cmd = set_cmd(key, value, self.default_ttl(conn));
        let reply: Result<Value, CacheError> = self.query(conn, &cmd).await;
        reply.map(|_| ()).inspect_err(|e| {
            tracing::warn!(conn, key, error = %e, "cache write failed");
        })
    }

    /// Values for `keys`, aligned with the input.
    pub async fn mget(&self, conn: ConnectionId, keys: &[impl AsRef<str>]) -> Vec<CacheValue> {
        if keys.is_empty() {
            return Vec::new();
        }
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key.as_ref());
        }
        let reply = self.read_raw(conn, &cmd, keys[0].as_ref()).await;
        let mut values: Vec<CacheValue> = match reply {
            Value::Array(items) => items.into_iter().map(CacheValue::from).collect(),
            _ => Vec::new(),
        };
        values.resize(keys.len(), CacheValue::Absent);
        values
    }

    /// `MSET` followed by an expire of every key, in one pipeline.
    pub async fn mset<V: ToRedisArgs>(&self, conn: ConnectionId, pairs: &[(impl AsRef<str>, V)]) {
        if pairs.is_empty() {
            return;
        }
        let ttl = self.default_ttl(conn);
        let mut mset = redis::cmd("MSET");
        for (key, value) in pairs {
            mset.arg(key.as_ref()).arg(value);
        }
        let mut batch = Batch::with_capacity(pairs.len() + 1);
        batch.push(mset);
        for (key, _) in pairs {
            batch.expire(key.as_ref(), ttl);
        }
        self.apply_logged(conn, &batch, "mset").await;
    }

    pub async fn delete(&self, conn: ConnectionId, key: &str) {
        self.write(conn, &cmd_with_key("DEL", key), key).await;
    }

    pub async fn mdelete(&self, conn: ConnectionId, keys: &[impl AsRef<str>]) {
        if keys.is_empty() {
            return;
        }
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key.as_ref());
        }
        self.write(conn, &cmd, keys[0].as_ref()).await;
    }

    /// Delete every key matching `pattern` (blocking `KEYS`). Returns how
    /// many keys matched.
    pub async fn delete_pattern(&self, conn: ConnectionId, pattern: &str) -> usize {
        let keys = self.keys(conn, pattern).await;
        if !keys.is_empty() {
            self.mdelete(conn, &keys).await;
            tracing::debug!(conn, pattern, deleted = keys.len(), "deleted keys by pattern");
        }
        keys.len()
    }
}
