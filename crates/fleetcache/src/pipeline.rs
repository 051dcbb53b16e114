//! Pipelined batches.
//!
//! A [`Batch`] holds one command per item, in caller order, and is sent in a
//! single round trip. Replies come back aligned with the commands.
//!
//! The Redis client reports a pipeline in which any single command was
//! rejected as one error. Reads recover from that by replaying each command
//! on its own so that siblings of the bad item still get their replies. A
//! transport failure is not replayed: every item reads as missing.

use std::time::Duration;

use redis::aio::ConnectionLike;
use redis::{Cmd, ToRedisArgs, Value};

use crate::error::{CacheError, is_transport_error, timed};

/// Ordered list of commands executed as one pipeline.
#[derive(Clone, Default)]
pub struct Batch {
    cmds: Vec<Cmd>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cmds: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, cmd: Cmd) -> &mut Self {
        self.cmds.push(cmd);
        self
    }

    /// Append `PEXPIRE key ttl`; zero TTLs are skipped.
    pub fn expire<K: ToRedisArgs>(&mut self, key: K, ttl: Duration) -> &mut Self {
        if let Some(cmd) = expire_cmd(key, ttl) {
            self.cmds.push(cmd);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    fn pipeline(&self) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        for cmd in &self.cmds {
            pipe.add_command(cmd.clone());
        }
        pipe
    }

    /// Run the batch and return one reply per command.
    ///
    /// Failed items come back as [`Value::Nil`]; the result always has
    /// [`len`](Self::len) entries.
    pub async fn fetch<C>(&self, conn: &mut C, timeout: Duration) -> Vec<Value>
    where
        C: ConnectionLike + Send,
    {
        if self.cmds.is_empty() {
            return Vec::new();
        }

        let pipe = self.pipeline();
        let reply: Result<Vec<Value>, CacheError> = timed(timeout, pipe.query_async(&mut *conn)).await;
        match reply {
            Ok(values) => align(values, self.cmds.len()),
            Err(e) if e.is_transport() => {
                tracing::warn!(error = %e, commands = self.cmds.len(), "pipeline failed");
                vec![Value::Nil; self.cmds.len()]
            }
            Err(e) => {
                tracing::debug!(error = %e, "pipeline rejected, replaying commands one by one");
                self.replay(conn, timeout).await
            }
        }
    }

    async fn replay<C>(&self, conn: &mut C, timeout: Duration) -> Vec<Value>
    where
        C: ConnectionLike + Send,
    {
        let mut values = Vec::with_capacity(self.cmds.len());
        for cmd in &self.cmds {
            let reply: Result<Value, CacheError> = timed(timeout, cmd.query_async(&mut *conn)).await;
            match reply {
                Ok(value) => values.push(value),
                Err(CacheError::Redis(e)) if !is_transport_error(&e) => {
                    tracing::debug!(error = %e, "batch item rejected");
                    values.push(Value::Nil);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "pipeline replay aborted");
                    break;
                }
            }
        }
        values.resize(self.cmds.len(), Value::Nil);
        values
    }

    /// Run a batch of writes. Writes are never replayed.
    pub async fn apply<C>(&self, conn: &mut C, timeout: Duration) -> Result<(), CacheError>
    where
        C: ConnectionLike + Send,
    {
        if self.cmds.is_empty() {
            return Ok(());
        }
        let pipe = self.pipeline();
        let _: Vec<Value> = timed(timeout, pipe.query_async(&mut *conn)).await?;
        Ok(())
    }
}

/// `PEXPIRE key ttl`, or `None` for a zero TTL.
pub(crate) fn expire_cmd<K: ToRedisArgs>(key: K, ttl: Duration) -> Option<Cmd> {
    let millis = ttl.as_millis();
    if millis == 0 {
        return None;
    }
    let mut cmd = redis::cmd("PEXPIRE");
    cmd.arg(key).arg(u64::try_from(millis).unwrap_or(u64::MAX));
    Some(cmd)
}

// Server error replies embedded in the array count as missing items.
fn align(values: Vec<Value>, len: usize) -> Vec<Value> {
    let mut values: Vec<Value> = values
        .into_iter()
        .map(|v| match v {
            Value::ServerError(e) => {
                tracing::debug!(error = ?e, "batch item rejected");
                Value::Nil
            }
            other => other,
        })
        .collect();
    values.resize(len, Value::Nil);
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnection, bulk, io_error, server_error};
    use redis::ErrorKind;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn hget(key: &str, field: &str) -> Cmd {
        let mut cmd = redis::cmd("HGET");
        cmd.arg(key).arg(field);
        cmd
    }

    #[tokio::test]
    async fn replies_follow_input_order_in_one_round_trip() {
        let mut conn = FakeConnection::new(|args| Ok(bulk(&format!("{}:{}", args[1], args[2]))));
        let mut batch = Batch::new();
        for key in ["c", "a", "b"] {
            batch.push(hget(key, "f"));
        }

        let values = batch.fetch(&mut conn, TIMEOUT).await;
        assert_eq!(values, vec![bulk("c:f"), bulk("a:f"), bulk("b:f")]);
        assert_eq!(conn.round_trips, 1);
    }

    #[tokio::test]
    async fn empty_batch_does_not_touch_the_connection() {
        let mut conn = FakeConnection::new(|_| Ok(Value::Nil));
        assert!(Batch::new().fetch(&mut conn, TIMEOUT).await.is_empty());
        assert!(Batch::new().apply(&mut conn, TIMEOUT).await.is_ok());
        assert_eq!(conn.round_trips, 0);
    }

    #[tokio::test]
    async fn rejected_item_does_not_hide_its_siblings() {
        let mut conn = FakeConnection::new(|args| {
            if args[1] == "wrongtype" {
                Err(server_error(ErrorKind::TypeError, "WRONGTYPE"))
            } else {
                Ok(bulk(&args[1]))
            }
        });
        let mut batch = Batch::new();
        batch
            .push(hget("first", "f"))
            .push(hget("wrongtype", "f"))
            .push(hget("third", "f"));

        let values = batch.fetch(&mut conn, TIMEOUT).await;
        assert_eq!(values, vec![bulk("first"), Value::Nil, bulk("third")]);
        // one pipeline plus three single replays
        assert_eq!(conn.round_trips, 4);
    }

    #[tokio::test]
    async fn transport_failure_degrades_every_item() {
        let mut conn = FakeConnection::new(|_| Err(io_error()));
        let mut batch = Batch::new();
        batch.push(hget("a", "f")).push(hget("b", "f"));

        let values = batch.fetch(&mut conn, TIMEOUT).await;
        assert_eq!(values, vec![Value::Nil, Value::Nil]);
        assert_eq!(conn.round_trips, 1);
    }

    #[tokio::test]
    async fn writes_are_not_replayed() {
        let mut conn = FakeConnection::new(|args| {
            if args[0] == "LPUSH" {
                Err(server_error(ErrorKind::TypeError, "WRONGTYPE"))
            } else {
                Ok(Value::Int(1))
            }
        });
        let mut batch = Batch::new();
        let mut push = redis::cmd("LPUSH");
        push.arg("list").arg("x");
        batch.push(push).expire("list", Duration::from_secs(5));

        assert!(batch.apply(&mut conn, TIMEOUT).await.is_err());
        assert_eq!(conn.round_trips, 1);
        assert_eq!(conn.command_names(), vec!["LPUSH", "PEXPIRE"]);
    }

    #[test]
    fn zero_ttl_adds_no_expire() {
        let mut batch = Batch::new();
        batch.expire("k", Duration::ZERO);
        assert!(batch.is_empty());
        batch.expire("k", Duration::from_millis(1500));
        assert_eq!(batch.len(), 1);
    }
}
