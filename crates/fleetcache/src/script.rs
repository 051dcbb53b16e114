//! Server-side multi-key hash reads.
//!
//! The script returns `HMGET key fields...` for every key in one atomic call.
//! Its SHA is cached per connection; a `NOSCRIPT` reply (script flushed or
//! server restarted) drops the cached SHA, reloads the script and retries
//! once.

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::RwLock;
use redis::aio::ConnectionLike;
use redis::{ErrorKind, Value};

use crate::error::{CacheError, timed};
use crate::registry::ConnectionId;
use crate::value::CacheValue;

/// Field name → value, in request order.
pub type FieldMap = IndexMap<String, CacheValue>;

pub const HMGET_KEYS_SCRIPT: &str = r#"
local results = {}
for i = 1, #KEYS do
    results[i] = redis.call("HMGET", KEYS[i], unpack(ARGV))
end
return results
"#;

/// Connection id → SHA of the loaded script.
#[derive(Debug, Default)]
pub struct ScriptCache {
    shas: RwLock<HashMap<ConnectionId, String>>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sha(&self, conn: ConnectionId) -> Option<String> {
        self.shas.read().get(&conn).cloned()
    }

    pub fn forget(&self, conn: ConnectionId) {
        self.shas.write().remove(&conn);
    }

    async fn load<C>(&self, id: ConnectionId, conn: &mut C, timeout: Duration) -> Result<String, CacheError>
    where
        C: ConnectionLike + Send,
    {
        let mut cmd = redis::cmd("SCRIPT");
        cmd.arg("LOAD").arg(HMGET_KEYS_SCRIPT);
        let sha: String = timed(timeout, cmd.query_async(&mut *conn)).await?;
        tracing::debug!(conn = id, sha = %sha, "script loaded");
        self.shas.write().insert(id, sha.clone());
        Ok(sha)
    }

    async fn sha_or_load<C>(&self, id: ConnectionId, conn: &mut C, timeout: Duration) -> Result<String, CacheError>
    where
        C: ConnectionLike + Send,
    {
        match self.sha(id) {
            Some(sha) => Ok(sha),
            None => self.load(id, conn, timeout).await,
        }
    }

    /// Read `fields` from every hash in `keys` atomically.
    ///
    /// The result has one map per key, aligned with `keys`; every map holds
    /// every requested field, missing ones as [`CacheValue::Absent`].
    pub async fn hmget_keys<C>(
        &self,
        id: ConnectionId,
        conn: &mut C,
        keys: &[String],
        fields: &[String],
        timeout: Duration,
    ) -> Result<Vec<FieldMap>, CacheError>
    where
        C: ConnectionLike + Send,
    {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        if fields.is_empty() {
            return Ok(vec![FieldMap::new(); keys.len()]);
        }

        let sha = self.sha_or_load(id, conn, timeout).await?;
        let reply = match evalsha(&sha, conn, keys, fields, timeout).await {
            Err(CacheError::Redis(e)) if e.kind() == ErrorKind::NoScriptError => {
                tracing::info!(conn = id, "script missing on server, reloading");
                self.forget(id);
                let sha = self.load(id, conn, timeout).await?;
                evalsha(&sha, conn, keys, fields, timeout).await
            }
            other => other,
        };

        match reply {
            Ok(value) => decode(value, keys.len(), fields),
            Err(e) => {
                tracing::warn!(conn = id, keys = keys.len(), error = %e, "script read failed");
                Err(e)
            }
        }
    }
}

async fn evalsha<C>(
    sha: &str,
    conn: &mut C,
    keys: &[String],
    fields: &[String],
    timeout: Duration,
) -> Result<Value, CacheError>
where
    C: ConnectionLike + Send,
{
    let mut cmd = redis::cmd("EVALSHA");
    cmd.arg(sha).arg(keys.len()).arg(keys).arg(fields);
    timed(timeout, cmd.query_async(&mut *conn)).await
}

fn decode(value: Value, key_count: usize, fields: &[String]) -> Result<Vec<FieldMap>, CacheError> {
    let rows = match value {
        Value::Array(rows) => rows,
        other => return Err(CacheError::Script(format!("expected array, got {other:?}"))),
    };
    if rows.len() != key_count {
        return Err(CacheError::Script(format!(
            "expected {key_count} rows, got {}",
            rows.len()
        )));
    }

    rows.into_iter()
        .map(|row| {
            let values = match row {
                Value::Array(values) => values,
                other => return Err(CacheError::Script(format!("expected row array, got {other:?}"))),
            };
            let mut values = values.into_iter();
            Ok(fields
                .iter()
                .map(|field| {
                    let value = values.next().map(CacheValue::from).unwrap_or_default();
                    (field.clone(), value)
                })
                .collect())
        })
        .collect()
}
