use std::collections::BTreeSet;
use std::time::Duration;

use redis::Value;
use redis::aio::ConnectionLike;

use super::{CacheClient, SCAN_BATCH, cmd_with_key};
use crate::error::{CacheError, timed};
use crate::pipeline::{Batch, expire_cmd};
use crate::registry::ConnectionId;
use crate::value::{value_to_bool, value_to_strings};

/// Walk the keyspace with `SCAN` until the cursor returns to 0.
///
/// SCAN may report a key more than once; the result holds each key once,
/// sorted. Keys that are not valid UTF-8 are kept in lossy form.
pub async fn scan_all<C>(conn: &mut C, pattern: &str, timeout: Duration) -> Result<Vec<String>, CacheError>
where
    C: ConnectionLike + Send,
{
    let mut found = BTreeSet::new();
    let mut cursor: u64 = 0;
    loop {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(SCAN_BATCH);
        let (next, keys): (u64, Vec<Vec<u8>>) = timed(timeout, cmd.query_async(&mut *conn)).await?;
        found.extend(keys.into_iter().map(|key| match String::from_utf8(key) {
            Ok(key) => key,
            Err(e) => {
                let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
                tracing::debug!(pattern, key = %lossy, "scan returned a non-UTF-8 key");
                lossy
            }
        }));
        if next == 0 {
            break;
        }
        cursor = next;
    }
    Ok(found.into_iter().collect())
}

/// PTTL reply → remaining lifetime; no TTL or missing key → zero.
fn ttl_from_reply(value: &Value) -> Duration {
    match value {
        Value::Int(ms) if *ms > 0 => Duration::from_millis(*ms as u64),
        _ => Duration::ZERO,
    }
}

impl CacheClient {
    pub async fn exists(&self, conn: ConnectionId, key: &str) -> bool {
        value_to_bool(&self.read_raw(conn, &cmd_with_key("EXISTS", key), key).await)
    }

    /// Set the key's TTL; zero is ignored.
    pub async fn expire(&self, conn: ConnectionId, key: &str, ttl: Duration) {
        if let Some(cmd) = expire_cmd(key, ttl) {
            self.write(conn, &cmd, key).await;
        }
    }

    pub async fn rename(&self, conn: ConnectionId, key: &str, new_key: &str) {
        let mut cmd = cmd_with_key("RENAME", key);
        cmd.arg(new_key);
        self.write(conn, &cmd, key).await;
    }

    /// Keys matching `pattern` with the blocking `KEYS` command.
    pub async fn keys(&self, conn: ConnectionId, pattern: &str) -> Vec<String> {
        value_to_strings(self.read_raw(conn, &cmd_with_key("KEYS", pattern), pattern).await)
    }

    /// Keys matching `pattern`, walked with `SCAN`.
    pub async fn scan(&self, conn: ConnectionId, pattern: &str) -> Vec<String> {
        let result = async {
            let connection = self.connection(conn)?;
            let mut handle = connection.get().await?;
            scan_all(&mut handle, pattern, connection.timeout()).await
        }
        .await;
        result.unwrap_or_else(|e| {
            tracing::warn!(conn, pattern, error = %e, "scan failed");
            Vec::new()
        })
    }

    /// Remaining lifetime of each key, aligned with `keys`.
    pub async fn ttl_multiple(&self, conn: ConnectionId, keys: &[impl AsRef<str>]) -> Vec<Duration> {
        let mut batch = Batch::with_capacity(keys.len());
        for key in keys {
            batch.push(cmd_with_key("PTTL", key.as_ref()));
        }
        self.fetch(conn, &batch)
            .await
            .iter()
            .map(ttl_from_reply)
            .collect()
    }

    /// Set the same TTL on every key in one pipeline.
    pub async fn mexpire(&self, conn: ConnectionId, keys: &[impl AsRef<str>], ttl: Duration) {
        let mut batch = Batch::with_capacity(keys.len());
        for key in keys {
            batch.expire(key.as_ref(), ttl);
        }
        self.apply_logged(conn, &batch, "mexpire").await;
    }
}
