//! Token → subject cache.
//!
//! Verified bearer tokens are remembered by their 64-bit fingerprint until the
//! token's own expiry. Lookups of expired entries are misses; a periodic sweep
//! drops them from memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use fleetcache_core::fingerprint;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

/// Seconds since the Unix epoch.
pub fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Result of verifying a token with the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject: String,
    /// Expiry as seconds since the Unix epoch
    pub expires_at: u64,
}

/// Verifies tokens the cache has not seen yet.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `None` when the token is invalid or verification failed.
    async fn verify(&self, token: &str) -> Option<VerifiedToken>;
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of entries currently in the cache.
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Number of entries dropped because they expired.
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

struct IdentityEntry {
    subject: Arc<str>,
    expires_at: u64,
}

#[derive(Default)]
pub struct IdentityCache {
    entries: RwLock<HashMap<u64, IdentityEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<Arc<str>> {
        self.get_at(token, now_epoch())
    }

    /// Lookup as of `now` (epoch seconds).
    pub fn get_at(&self, token: &str, now: u64) -> Option<Arc<str>> {
        let key = fingerprint(token);
        let found = self
            .entries
            .read()
            .get(&key)
            .filter(|entry| entry.expires_at >= now)
            .map(|entry| Arc::clone(&entry.subject));

        match found {
            Some(subject) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(subject)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, token: &str, subject: impl Into<Arc<str>>, expires_at: u64) {
        let entry = IdentityEntry {
            subject: subject.into(),
            expires_at,
        };
        self.entries.write().insert(fingerprint(token), entry);
    }

    pub fn invalidate(&self, token: &str) {
        self.entries.write().remove(&fingerprint(token));
    }

    /// Cached subject for `token`, verifying and caching it on a miss.
    ///
    /// Tokens without a `.` are not JWTs and are rejected without calling
    /// the verifier.
    pub async fn resolve(&self, token: &str, verifier: &dyn TokenVerifier) -> Option<Arc<str>> {
        if let Some(subject) = self.get(token) {
            return Some(subject);
        }
        if !token.contains('.') {
            return None;
        }
        let verified = verifier.verify(token).await?;
        let subject: Arc<str> = verified.subject.into();
        self.insert(token, Arc::clone(&subject), verified.expires_at);
        Some(subject)
    }

    /// Drop entries that expired before `now`. Returns how many were dropped.
    ///
    /// Expired keys are collected under the read lock; the write lock is only
    /// taken when there is something to delete.
    pub fn sweep_expired(&self, now: u64) -> usize {
        let expired: Vec<u64> = self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.expires_at < now)
            .map(|(key, _)| *key)
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let mut entries = self.entries.write();
        let removed = expired
            .iter()
            .filter(|key| entries.remove(key).is_some())
            .count();
        drop(entries);

        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        debug!(removed, "swept expired identities");
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Sweep every `interval` until `true` is sent on the returned sender.
    #[must_use = "dropping the sender stops the sweeper"]
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "identity sweeper started");
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.sweep_expired(now_epoch());
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("identity sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn hit_until_expiry() {
        let cache = IdentityCache::new();
        cache.insert("a.b.c", "user-1", 1_000);

        assert_eq!(cache.get_at("a.b.c", 999).as_deref(), Some("user-1"));
        assert_eq!(cache.get_at("a.b.c", 1_000).as_deref(), Some("user-1"));
        assert_eq!(cache.get_at("a.b.c", 1_001), None);
        assert_eq!(cache.get_at("other", 0), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn sweep_drops_only_expired_entries() {
        let cache = IdentityCache::new();
        cache.insert("t1", "u1", 100);
        cache.insert("t2", "u2", 200);
        cache.insert("t3", "u3", 300);

        assert_eq!(cache.sweep_expired(50), 0);
        assert_eq!(cache.sweep_expired(250), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("t3", 250).as_deref(), Some("u3"));
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = IdentityCache::new();
        cache.insert("t", "u", u64::MAX);
        cache.invalidate("t");
        assert!(cache.is_empty());
    }

    struct CountingVerifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenVerifier for CountingVerifier {
        async fn verify(&self, token: &str) -> Option<VerifiedToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (token != "bad.token").then(|| VerifiedToken {
                subject: format!("uid-{}", token.len()),
                expires_at: now_epoch() + 3600,
            })
        }
    }

    #[tokio::test]
    async fn resolve_verifies_once_then_hits_cache() {
        let cache = IdentityCache::new();
        let verifier = CountingVerifier {
            calls: AtomicUsize::new(0),
        };

        let first = cache.resolve("header.payload.sig", &verifier).await;
        let second = cache.resolve("header.payload.sig", &verifier).await;
        assert_eq!(first.as_deref(), Some("uid-18"));
        assert_eq!(first, second);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.resolve("bad.token", &verifier).await, None);
        assert_eq!(cache.resolve("no-dot", &verifier).await, None);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_shutdown() {
        let cache = Arc::new(IdentityCache::new());
        cache.insert("old", "u", 1);
        let shutdown = cache.start_sweeper(Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert!(cache.is_empty());

        shutdown.send(true).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_sender_stops_the_sweeper() {
        let cache = Arc::new(IdentityCache::new());
        cache.insert("old", "u", 1);
        drop(cache.start_sweeper(Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(121)).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.len(), 1);
    }
}
