use redis::ToRedisArgs;

use super::{CacheClient, cmd_with_key};
use crate::pipeline::Batch;
use crate::registry::ConnectionId;
use crate::value::{value_to_bool, value_to_strings};

impl CacheClient {
    /// Add members and refresh the set's TTL.
    pub async fn sadd(&self, conn: ConnectionId, key: &str, members: &[impl AsRef<str>]) {
        if members.is_empty() {
            return;
        }
        let mut cmd = cmd_with_key("SADD", key);
        for member in members {
            cmd.arg(member.as_ref());
        }
        if let Err(e) = self.write_touched(conn, cmd, key).await {
            tracing::warn!(conn, key, error = %e, "sadd failed");
        }
    }

    pub async fn sismember<M: ToRedisArgs>(&self, conn: ConnectionId, key: &str, member: M) -> bool {
        let mut cmd = cmd_with_key("SISMEMBER", key);
        cmd.arg(member);
        value_to_bool(&self.read_raw(conn, &cmd, key).await)
    }

    pub async fn smembers(&self, conn: ConnectionId, key: &str) -> Vec<String> {
        value_to_strings(self.read_raw(conn, &cmd_with_key("SMEMBERS", key), key).await)
    }

    pub async fn sunion(&self, conn: ConnectionId, keys: &[impl AsRef<str>]) -> Vec<String> {
        if keys.is_empty() {
            return Vec::new();
        }
        let mut cmd = redis::cmd("SUNION");
        for key in keys {
            cmd.arg(key.as_ref());
        }
        value_to_strings(self.read_raw(conn, &cmd, keys[0].as_ref()).await)
    }

    /// Membership of `member` in each set.
    pub async fn msismember<M: ToRedisArgs>(&self, conn: ConnectionId, keys: &[impl AsRef<str>], member: M) -> Vec<bool> {
        let mut batch = Batch::with_capacity(keys.len());
        for key in keys {
            let mut cmd = cmd_with_key("SISMEMBER", key.as_ref());
            cmd.arg(&member);
            batch.push(cmd);
        }
        self.fetch(conn, &batch)
            .await
            .iter()
            .map(value_to_bool)
            .collect()
    }

    /// Members of each set; missing sets are empty.
    pub async fn msmembers(&self, conn: ConnectionId, keys: &[impl AsRef<str>]) -> Vec<Vec<String>> {
        let mut batch = Batch::with_capacity(keys.len());
        for key in keys {
            batch.push(cmd_with_key("SMEMBERS", key.as_ref()));
        }
        self.fetch(conn, &batch)
            .await
            .into_iter()
            .map(value_to_strings)
            .collect()
    }

    /// Remove `member` from every set in `keys`.
    pub async fn mset_remove_member<M: ToRedisArgs>(&self, conn: ConnectionId, keys: &[impl AsRef<str>], member: M) {
        let mut batch = Batch::with_capacity(keys.len());
        for key in keys {
            let mut cmd = cmd_with_key("SREM", key.as_ref());
            cmd.arg(&member);
            batch.push(cmd);
        }
        self.apply_logged(conn, &batch, "mset_remove_member").await;
    }
}
