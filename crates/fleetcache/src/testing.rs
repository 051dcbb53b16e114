//! In-process stand-in for a Redis connection.

use redis::aio::ConnectionLike;
use redis::{Arg, Cmd, Pipeline, RedisFuture, RedisResult, Value};

type Handler = Box<dyn FnMut(&[String]) -> RedisResult<Value> + Send>;

/// Answers each command with `handler` and records what was sent.
///
/// A pipeline in which any command fails is answered with that error as a
/// whole, the way the Redis client reports it.
pub(crate) struct FakeConnection {
    pub log: Vec<Vec<String>>,
    pub round_trips: usize,
    handler: Handler,
}

impl FakeConnection {
    pub fn new(handler: impl FnMut(&[String]) -> RedisResult<Value> + Send + 'static) -> Self {
        Self {
            log: Vec::new(),
            round_trips: 0,
            handler: Box::new(handler),
        }
    }

    /// Names of the commands sent, in order.
    pub fn command_names(&self) -> Vec<&str> {
        self.log
            .iter()
            .map(|args| args.first().map(String::as_str).unwrap_or(""))
            .collect()
    }
}

fn args_of(cmd: &Cmd) -> Vec<String> {
    cmd.args_iter()
        .map(|arg| match arg {
            Arg::Simple(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Arg::Cursor => "0".to_string(),
        })
        .collect()
}

impl ConnectionLike for FakeConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        self.round_trips += 1;
        let args = args_of(cmd);
        let reply = (self.handler)(&args);
        self.log.push(args);
        Box::pin(async move { reply })
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        pipeline: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        self.round_trips += 1;
        let mut replies = Vec::new();
        let mut first_error = None;
        for cmd in pipeline.cmd_iter() {
            let args = args_of(cmd);
            match (self.handler)(&args) {
                Ok(value) => replies.push(value),
                Err(e) => {
                    first_error.get_or_insert(e);
                    replies.push(Value::Nil);
                }
            }
            self.log.push(args);
        }
        let result = match first_error {
            Some(e) => Err(e),
            None => Ok(replies.into_iter().skip(offset).take(count).collect()),
        };
        Box::pin(async move { result })
    }

    fn get_db(&self) -> i64 {
        0
    }
}

pub(crate) fn bulk(s: &str) -> Value {
    Value::BulkString(s.as_bytes().to_vec())
}

pub(crate) fn server_error(kind: redis::ErrorKind, msg: &'static str) -> redis::RedisError {
    redis::RedisError::from((kind, msg))
}

pub(crate) fn io_error() -> redis::RedisError {
    redis::RedisError::from(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    ))
}
