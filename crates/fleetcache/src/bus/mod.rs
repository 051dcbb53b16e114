//! Fleet-wide command buses over Redis pub/sub.
//!
//! Every instance subscribes to one channel and runs the local callback
//! registered for each message. Publishing goes through a separate, lazily
//! created pool; the subscriber connection only ever listens.
//!
//! ```text
//! Instance 1: bus.send("rebuildCache")
//!   ↓
//! Redis: PUBLISH mrchannel "rebuildCache"
//!   ↓
//! Instance 2: listener receives "rebuildCache" → runs its callback
//! Instance 3: listener receives "rebuildCache" → runs its callback
//! ```

pub mod command;
pub mod entity;

use std::future::{Future, pending};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::Pool;
use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use redis::{AsyncCommands, Msg, RedisResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::BusConfig;
use crate::registry::{create_pool, redis_url};

pub use command::{CommandBus, CommandListeners, commands};
pub use entity::{EntityBus, EntityListeners};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
const PUBLISH_POOL_SIZE: usize = 4;

/// Errors raised by the command buses.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus is not configured: {0}")]
    Config(String),

    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis subscribe error: {0}")]
    Subscribe(String),

    #[error("Redis publish error: {0}")]
    Publish(String),

    #[error("keepalive failed: {0}")]
    Keepalive(String),

    #[error("Redis pub/sub stream ended")]
    StreamEnded,
}

/// Routes one received payload to local callbacks.
pub trait Dispatch: Send + Sync + 'static {
    /// Run the matching callbacks on their own task. `None` when nothing
    /// matched.
    fn dispatch(&self, payload: &str) -> Option<JoinHandle<()>>;
}

fn check_config(config: &BusConfig) -> Result<(), BusError> {
    if config.address.trim().is_empty() {
        return Err(BusError::Config("address is empty".into()));
    }
    if config.channel.trim().is_empty() {
        return Err(BusError::Config("channel is empty".into()));
    }
    Ok(())
}

/// Handle to a running subscription. Dropping it stops the listener.
pub struct BusHandle {
    shutdown: watch::Sender<bool>,
    ready: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl BusHandle {
    /// Whether the subscription is currently established.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the channel is subscribed. Returns false on timeout.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.clone();
        matches!(
            tokio::time::timeout(timeout, ready.wait_for(|subscribed| *subscribed)).await,
            Ok(Ok(_))
        )
    }

    /// Sender that stops the subscription when `true` is sent.
    pub fn shutdown_sender(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Stop the subscription and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "bus task ended abnormally");
        }
    }
}

/// Subscription loop for one channel.
struct Listener {
    url: String,
    channel: String,
    keepalive: Option<Duration>,
    dispatcher: Arc<dyn Dispatch>,
    ready: watch::Sender<bool>,
}

impl Listener {
    fn spawn(config: &BusConfig, dispatcher: Arc<dyn Dispatch>) -> Result<BusHandle, BusError> {
        check_config(config)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = watch::channel(false);
        let listener = Self {
            url: redis_url(&config.address, 0),
            channel: config.channel.clone(),
            keepalive: config.keepalive(),
            dispatcher,
            ready: ready_tx,
        };
        let task = tokio::spawn(listener.run(shutdown_rx));
        Ok(BusHandle {
            shutdown: shutdown_tx,
            ready: ready_rx,
            task,
        })
    }

    /// Reconnects with exponential backoff until shut down.
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(channel = %self.channel, "starting command bus listener");
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.session(&mut shutdown, &mut backoff).await {
                Ok(()) => break,
                Err(e) => {
                    self.ready.send_replace(false);
                    error!(
                        channel = %self.channel,
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "command bus listener error, reconnecting..."
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        self.ready.send_replace(false);
        info!(channel = %self.channel, "command bus listener stopped");
    }

    /// One subscription; `Ok` only on shutdown.
    async fn session(&self, shutdown: &mut watch::Receiver<bool>, backoff: &mut Duration) -> Result<(), BusError> {
        let client = redis::Client::open(self.url.as_str()).map_err(|e| BusError::Connection(e.to_string()))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        info!(channel = %self.channel, "subscribed to command channel");
        *backoff = INITIAL_BACKOFF;
        self.ready.send_replace(true);

        // Re-subscribing is idempotent and round-trips on the subscribed socket.
        let (sink, stream) = pubsub.split();
        let resubscribe = || {
            let mut sink = sink.clone();
            let channel = self.channel.clone();
            async move { sink.subscribe(channel).await }
        };
        self.pump(stream, resubscribe, shutdown).await
    }

    /// Dispatch messages for this channel until shutdown, stream end or a
    /// failed keepalive round trip.
    async fn pump<S, K, F>(
        &self,
        messages: S,
        mut keepalive: K,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BusError>
    where
        S: Stream<Item = Msg>,
        K: FnMut() -> F,
        F: Future<Output = RedisResult<()>>,
    {
        let mut messages = pin!(messages);
        let mut ticker = self.keepalive.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                msg = messages.next() => match msg {
                    Some(msg) if msg.get_channel_name() == self.channel => {
                        match msg.get_payload::<String>() {
                            Ok(payload) => {
                                debug!(channel = %self.channel, payload = %payload, "received command");
                                self.dispatcher.dispatch(&payload);
                            }
                            Err(e) => warn!(error = %e, "failed to parse command payload"),
                        }
                    }
                    Some(msg) => {
                        debug!(channel = %msg.get_channel_name(), "ignoring message from other channel");
                    }
                    None => {
                        warn!(channel = %self.channel, "pub/sub stream ended");
                        return Err(BusError::StreamEnded);
                    }
                },
                _ = next_tick(&mut ticker) => {
                    self.check_alive(keepalive()).await?;
                }
            }
        }
    }

    async fn check_alive(&self, round_trip: impl Future<Output = RedisResult<()>>) -> Result<(), BusError> {
        let timeout = self.keepalive.unwrap_or(PUBLISH_TIMEOUT).min(PUBLISH_TIMEOUT);
        match tokio::time::timeout(timeout, round_trip).await {
            Ok(Ok(())) => {
                debug!(channel = %self.channel, "keepalive ok");
                Ok(())
            }
            Ok(Err(e)) => Err(BusError::Keepalive(e.to_string())),
            Err(_) => Err(BusError::Keepalive(format!("no reply within {timeout:?}"))),
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}

/// Lazily created publishing pool for one channel.
struct Publisher {
    url: String,
    channel: String,
    pool: Mutex<Option<Pool>>,
}

impl Publisher {
    fn new(config: &BusConfig) -> Self {
        Self {
            url: redis_url(&config.address, 0),
            channel: config.channel.clone(),
            pool: Mutex::new(None),
        }
    }

    fn pool(&self) -> Result<Pool, BusError> {
        let mut slot = self.pool.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }
        let pool = create_pool(&self.url, PUBLISH_POOL_SIZE, PUBLISH_TIMEOUT)
            .map_err(|e| BusError::Pool(e.to_string()))?;
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// Publish `payload`; returns how many subscribers received it.
    async fn publish(&self, payload: &str) -> Result<usize, BusError> {
        let pool = self.pool()?;
        let mut conn = pool.get().await.map_err(|e| BusError::Pool(e.to_string()))?;
        let receivers: usize = tokio::time::timeout(PUBLISH_TIMEOUT, conn.publish(&self.channel, payload))
            .await
            .map_err(|_| BusError::Publish(format!("no reply within {PUBLISH_TIMEOUT:?}")))?
            .map_err(|e| BusError::Publish(e.to_string()))?;
        debug!(channel = %self.channel, payload, receivers, "published command");
        Ok(receivers)
    }
}
