use std::time::Duration;

use redis::{Cmd, ToRedisArgs};

use super::{CacheClient, cmd_with_key};
use crate::pipeline::Batch;
use crate::registry::ConnectionId;
use crate::value::value_to_strings;

fn lpush_cmd<V: ToRedisArgs>(key: &str, values: &[V]) -> Cmd {
    let mut cmd = cmd_with_key("LPUSH", key);
    for value in values {
        cmd.arg(value);
    }
    cmd
}

/// DEL + LPUSH + PEXPIRE. An empty `values` only deletes.
fn replace_batch<V: ToRedisArgs>(key: &str, values: &[V], ttl: Duration) -> Batch {
    let mut batch = Batch::with_capacity(3);
    batch.push(cmd_with_key("DEL", key));
    if !values.is_empty() {
        batch.push(lpush_cmd(key, values)).expire(key, ttl);
    }
    batch
}

impl CacheClient {
    /// Prepend `values` and set the list's TTL.
    pub async fn lpush<V: ToRedisArgs>(&self, conn: ConnectionId, key: &str, values: &[V], ttl: Duration) {
        if values.is_empty() {
            return;
        }
        let mut batch = Batch::with_capacity(2);
        batch.push(lpush_cmd(key, values)).expire(key, ttl);
        self.apply_logged(conn, &batch, "lpush").await;
    }

    /// Replace the whole list with `values`.
    pub async fn lset_elements<V: ToRedisArgs>(&self, conn: ConnectionId, key: &str, values: &[V], ttl: Duration) {
        let batch = replace_batch(key, values, ttl);
        self.apply_logged(conn, &batch, "lset_elements").await;
    }

    pub async fn lrange_all(&self, conn: ConnectionId, key: &str) -> Vec<String> {
        let mut cmd = cmd_with_key("LRANGE", key);
        cmd.arg(0).arg(-1);
        value_to_strings(self.read_raw(conn, &cmd, key).await)
    }
}
