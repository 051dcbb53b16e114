use redis::{Cmd, ToRedisArgs, Value};

use super::{CacheClient, cmd_with_key};
use crate::error::CacheError;
use crate::pipeline::Batch;
use crate::registry::ConnectionId;
use crate::script::FieldMap;
use crate::value::{CacheValue, value_to_bool, value_to_pairs};

/// One `(key, field)` lookup of a bulk hash read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashItem {
    pub key: String,
    pub field: String,
}

impl HashItem {
    pub fn new(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            field: field.into(),
        }
    }
}

fn hget_cmd(key: &str, field: &str) -> Cmd {
    let mut cmd = cmd_with_key("HGET", key);
    cmd.arg(field);
    cmd
}

fn hset_cmd<V: ToRedisArgs>(key: &str, field: &str, value: V) -> Cmd {
    let mut cmd = cmd_with_key("HSET", key);
    cmd.arg(field).arg(value);
    cmd
}

fn hmget_cmd(key: &str, fields: &[impl AsRef<str>]) -> Cmd {
    let mut cmd = cmd_with_key("HMGET", key);
    for field in fields {
        cmd.arg(field.as_ref());
    }
    cmd
}

/// Pair an `HMGET` reply with the fields that were asked for.
fn field_map(fields: &[impl AsRef<str>], reply: Value) -> FieldMap {
    let mut values = match reply {
        Value::Array(values) => values.into_iter(),
        _ => Vec::new().into_iter(),
    };
    fields
        .iter()
        .map(|f| {
            let value = values.next().map(CacheValue::from).unwrap_or_default();
            (f.as_ref().to_string(), value)
        })
        .collect()
}

impl CacheClient {
    pub async fn hget(&self, conn: ConnectionId, key: &str, field: &str) -> CacheValue {
        self.read(conn, &hget_cmd(key, field), key).await
    }

    pub async fn hget_z(&self, conn: ConnectionId, key: &str, field: &str) -> CacheValue {
        let value = self.hget(conn, key, field).await;
        self.decompress(value)
    }

    pub async fn hget_int(&self, conn: ConnectionId, key: &str, field: &str, default: i64) -> i64 {
        self.hget(conn, key, field).await.parse_or(default)
    }

    pub async fn hget_u32(&self, conn: ConnectionId, key: &str, field: &str, default: u32) -> u32 {
        self.hget(conn, key, field).await.parse_or(default)
    }

    pub async fn hget_string(&self, conn: ConnectionId, key: &str, field: &str, default: &str) -> String {
        match self.hget(conn, key, field).await {
            CacheValue::Present(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| default.to_string()),
            CacheValue::Absent => default.to_string(),
        }
    }

    /// Every field of the hash; empty when missing.
    pub async fn hget_all(&self, conn: ConnectionId, key: &str) -> FieldMap {
        let reply = self.read_raw(conn, &cmd_with_key("HGETALL", key), key).await;
        value_to_pairs(reply).into_iter().collect()
    }

    /// `fields` of one hash, in request order.
    pub async fn hmget(&self, conn: ConnectionId, key: &str, fields: &[impl AsRef<str>]) -> FieldMap {
        if fields.is_empty() {
            return FieldMap::new();
        }
        let reply = self.read_raw(conn, &hmget_cmd(key, fields), key).await;
        field_map(fields, reply)
    }

    pub async fn hset<V: ToRedisArgs>(&self, conn: ConnectionId, key: &str, field: &str, value: V) {
        if let Err(e) = self.write_touched(conn, hset_cmd(key, field, value), key).await {
            tracing::warn!(conn, key, field, error = %e, "hset failed");
        }
    }

    pub async fn try_hset<V: ToRedisArgs>(
        &self,
        conn: ConnectionId,
        key: &str,
        field: &str,
        value: V,
    ) -> Result<(), CacheError> {
        self.write_touched(conn, hset_cmd(key, field, value), key)
            .await
            .inspect_err(|e| tracing::warn!(conn, key, field, error = %e, "hset failed"))
    }

    pub async fn hset_z(&self, conn: ConnectionId, key: &str, field: &str, value: &[u8]) {
        let packed = self.compress(value);
        self.hset(conn, key, field, packed.as_ref()).await;
    }

    pub async fn hset_int(&self, conn: ConnectionId, key: &str, field: &str, value: i64) {
        self.hset(conn, key, field, value).await;
    }

    pub async fn hset_u32(&self, conn: ConnectionId, key: &str, field: &str, value: u32) {
        self.hset(conn, key, field, value).await;
    }

    /// Set several fields of one hash.
    pub async fn hmset<V: ToRedisArgs>(&self, conn: ConnectionId, key: &str, fields: &[(impl AsRef<str>, V)]) {
        if fields.is_empty() {
            tracing::warn!(conn, key, "hmset called with no fields");
            return;
        }
        let mut cmd = cmd_with_key("HSET", key);
        for (field, value) in fields {
            cmd.arg(field.as_ref()).arg(value);
        }
        if let Err(e) = self.write_touched(conn, cmd, key).await {
            tracing::warn!(conn, key, error = %e, "hmset failed");
        }
    }

    pub async fn hdelete(&self, conn: ConnectionId, key: &str, fields: &[impl AsRef<str>]) {
        if fields.is_empty() {
            return;
        }
        let mut cmd = cmd_with_key("HDEL", key);
        for field in fields {
            cmd.arg(field.as_ref());
        }
        if let Err(e) = self.write_touched(conn, cmd, key).await {
            tracing::warn!(conn, key, error = %e, "hdelete failed");
        }
    }

    /// `HGET` for every item in one pipeline.
    pub async fn hget_multiple(&self, conn: ConnectionId, items: &[HashItem]) -> Vec<CacheValue> {
        let mut batch = Batch::with_capacity(items.len());
        for item in items {
            batch.push(hget_cmd(&item.key, &item.field));
        }
        self.fetch(conn, &batch)
            .await
            .into_iter()
            .map(CacheValue::from)
            .collect()
    }

    /// One field from many hashes.
    pub async fn hget_multiple_keys_one_field(
        &self,
        conn: ConnectionId,
        keys: &[impl AsRef<str>],
        field: &str,
    ) -> Vec<CacheValue> {
        let mut batch = Batch::with_capacity(keys.len());
        for key in keys {
            batch.push(hget_cmd(key.as_ref(), field));
        }
        self.fetch(conn, &batch)
            .await
            .into_iter()
            .map(CacheValue::from)
            .collect()
    }

    pub async fn hget_int_multiple_keys_one_field(
        &self,
        conn: ConnectionId,
        keys: &[impl AsRef<str>],
        field: &str,
        default: i64,
    ) -> Vec<i64> {
        self.hget_multiple_keys_one_field(conn, keys, field)
            .await
            .iter()
            .map(|v| v.parse_or(default))
            .collect()
    }

    /// `HMGET` per `(key, fields)` item in one pipeline.
    pub async fn hget_multiple_fields<F: AsRef<str>>(
        &self,
        conn: ConnectionId,
        items: &[(impl AsRef<str>, Vec<F>)],
    ) -> Vec<FieldMap> {
        let mut batch = Batch::with_capacity(items.len());
        for (key, fields) in items {
            if fields.is_empty() {
                // HMGET needs at least one field; the reply is padded below
                batch.push(redis::cmd("PING"));
            } else {
                batch.push(hmget_cmd(key.as_ref(), fields));
            }
        }
        self.fetch(conn, &batch)
            .await
            .into_iter()
            .zip(items)
            .map(|(reply, (_, fields))| field_map(fields, reply))
            .collect()
    }

    /// Every field of many hashes; missing hashes are empty maps.
    pub async fn hmget_all(&self, conn: ConnectionId, keys: &[impl AsRef<str>]) -> Vec<FieldMap> {
        let mut batch = Batch::with_capacity(keys.len());
        for key in keys {
            batch.push(cmd_with_key("HGETALL", key.as_ref()));
        }
        self.fetch(conn, &batch)
            .await
            .into_iter()
            .map(|reply| value_to_pairs(reply).into_iter().collect())
            .collect()
    }

    /// Remove `fields` from every hash in `keys`.
    pub async fn hmdelete(&self, conn: ConnectionId, keys: &[impl AsRef<str>], fields: &[impl AsRef<str>]) {
        if fields.is_empty() {
            return;
        }
        let ttl = self.default_ttl(conn);
        let mut batch = Batch::with_capacity(keys.len() * 2);
        for key in keys {
            let mut cmd = cmd_with_key("HDEL", key.as_ref());
            for field in fields {
                cmd.arg(field.as_ref());
            }
            batch.push(cmd).expire(key.as_ref(), ttl);
        }
        self.apply_logged(conn, &batch, "hmdelete").await;
    }

    /// Set several fields on several hashes in one pipeline.
    pub async fn hmset_multiple_keys<F: AsRef<str>, V: ToRedisArgs>(
        &self,
        conn: ConnectionId,
        items: &[(impl AsRef<str>, Vec<(F, V)>)],
    ) {
        let ttl = self.default_ttl(conn);
        let mut batch = Batch::with_capacity(items.len() * 2);
        for (key, fields) in items {
            if fields.is_empty() {
                continue;
            }
            let mut cmd = cmd_with_key("HSET", key.as_ref());
            for (field, value) in fields {
                cmd.arg(field.as_ref()).arg(value);
            }
            batch.push(cmd).expire(key.as_ref(), ttl);
        }
        self.apply_logged(conn, &batch, "hmset_multiple_keys").await;
    }

    /// Set the same field on several hashes in one pipeline.
    pub async fn hmset_multiple_keys_one_field<V: ToRedisArgs>(
        &self,
        conn: ConnectionId,
        field: &str,
        items: &[(impl AsRef<str>, V)],
    ) {
        let ttl = self.default_ttl(conn);
        let mut batch = Batch::with_capacity(items.len() * 2);
        for (key, value) in items {
            batch
                .push(hset_cmd(key.as_ref(), field, value))
                .expire(key.as_ref(), ttl);
        }
        self.apply_logged(conn, &batch, "hmset_multiple_keys_one_field").await;
    }

    /// Whether `field` exists in each hash.
    pub async fn mhexists(&self, conn: ConnectionId, keys: &[impl AsRef<str>], field: &str) -> Vec<bool> {
        let mut batch = Batch::with_capacity(keys.len());
        for key in keys {
            let mut cmd = cmd_with_key("HEXISTS", key.as_ref());
            cmd.arg(field);
            batch.push(cmd);
        }
        self.fetch(conn, &batch)
            .await
            .iter()
            .map(value_to_bool)
            .collect()
    }

    /// Atomic read of `fields` from every hash in `keys` via the cached
    /// server-side script. One map per key, aligned with `keys`.
    pub async fn hmget_keys(
        &self,
        conn: ConnectionId,
        keys: &[String],
        fields: &[String],
    ) -> Result<Vec<FieldMap>, CacheError> {
        let connection = self.connection(conn)?;
        let mut handle = connection.get().await?;
        self.scripts
            .hmget_keys(conn, &mut handle, keys, fields, connection.timeout())
            .await
    }
}
