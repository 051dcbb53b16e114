use std::time::Duration;

use crate::registry::ConnectionId;

/// Errors surfaced by the cache client.
///
/// Most read paths never return these: they log and fall back to a default.
/// Explicit-result operations (`try_*`, script reads) return them as-is.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("invalid connection settings: {0}")]
    Config(String),

    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected script reply: {0}")]
    Script(String),
}

impl CacheError {
    /// Transport-level failure (as opposed to a rejected command).
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Pool(_) | Self::Timeout(_) | Self::UnknownConnection(_) => true,
            Self::Redis(e) => is_transport_error(e),
            Self::Config(_) | Self::Script(_) => false,
        }
    }
}

pub(crate) fn is_transport_error(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
}

/// Await a Redis future, bounded by the connection's operation timeout.
pub(crate) async fn timed<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = redis::RedisResult<T>>,
) -> Result<T, CacheError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(reply) => reply.map_err(CacheError::from),
        Err(_) => Err(CacheError::Timeout(timeout)),
    }
}
