//! Generic command bus: payloads are command names, matched exactly.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::info;

use super::{BusError, BusHandle, Dispatch, Listener, Publisher, check_config};
use crate::config::BusConfig;

/// Well-known command names shared by the fleet.
pub mod commands {
    pub const REBUILD_CACHE: &str = "rebuildCache";
    pub const REFRESH_QUERY_VERSION: &str = "refreshQueryVersion";
    pub const REFRESH_NEWS: &str = "refreshNews";
    pub const REFRESH_CLIENT_CONFIG: &str = "refreshClientConfig";
    pub const REFRESH_CLIENT_SCRIPT: &str = "refreshClientScript";
    pub const REFRESH_CROSS_SEARCH: &str = "refreshCrossSearch";
    pub const REFRESH_BLACKLIST: &str = "refreshBlacklist";
    pub const REFRESH_SOURCE: &str = "refreshSource";
    pub const CLEAR_INTERNAL_CACHE: &str = "clearCache";
    pub const PRINT_USAGE: &str = "printUsage";
    pub const UPDATE_IP_DB: &str = "updateIPDB";
    pub const FORCE_RELOAD_IP_DB: &str = "reloadIPDB";
    pub const SLAVE_REFRESH_CROSS_SEARCH: &str = "slaveRefreshCrossSearch";
    pub const SLAVE_REFRESH_LICENSE: &str = "slaveRefreshLicense";
    pub const SLAVE_REFRESH_SOURCE_CACHE_SEARCH: &str = "slaveRefreshMRSourceCacheSearch";
    pub const SLAVE_REFRESH_SOURCE_CACHE_SERIES: &str = "slaveRefreshMRSourceCacheSeries";
    pub const SLAVE_REFRESH_CACHE_SYNC_CATALOG: &str = "slaveRefreshCache_SyncCatalog";
    pub const SLAVE_REFRESH_CACHE_FULL_CATALOG: &str = "slaveRefreshCache_FullCatalog";
    pub const SLAVE_REFRESH_CACHE_LATEST_UPDATE_CATALOG: &str = "slaveRefreshCache_LatestUpdateCatalog";
    pub const SLAVE_REFRESH_CACHE_SOURCE_LATEST_UPDATE_FEED: &str = "slaveRefreshCache_MRSourceLatestUpdateFeed";
    pub const SLAVE_REFRESH_CACHE_WEEKLY_FEATURE: &str = "slaveRefreshCache_WeekyFeature";
    pub const SLAVE_REFRESH_CACHE_REALTIME_FEATURE: &str = "slaveRefreshCache_RealtimeFeature";
    pub const REFRESH_FOR_YOU_LIST: &str = "refreshForYouList";
    pub const REFRESH_ADS_CONFIGS: &str = "refreshAdsConfigs";
    pub const REFRESH_ANDROID_UPGRADE: &str = "refreshAndroidUpgrade";
    pub const REFRESH_BETA_VERSION: &str = "refreshBetaVersion";
    pub const REFRESH_STICKER_PACKS: &str = "refreshStickerPacks";
    pub const REFRESH_WALLPAPER_LIST: &str = "refreshWallpaperList";
    pub const REFRESH_ADDONS_PUSH_PAYLOADS: &str = "refreshAddonsPushPayloads";
    pub const REFRESH_USER_CONTENT_AUDIENCE: &str = "refreshUserContentAudience";
    pub const REFRESH_TEST_USER_CONTENT_AUDIENCE: &str = "refreshTestUserContentAudience";
    pub const REBUILD_AUDIENCE_CACHE: &str = "rebuildAudienceCache";
    pub const REBUILD_TEST_AUDIENCE_CACHE: &str = "rebuildTestAudienceCache";
    pub const REFRESH_SUBSCRIPTION_CONFIG: &str = "refreshSubscriptionConfig";

    /// Every name above.
    pub const ALL: &[&str] = &[
        REBUILD_CACHE,
        REFRESH_QUERY_VERSION,
        REFRESH_NEWS,
        REFRESH_CLIENT_CONFIG,
        REFRESH_CLIENT_SCRIPT,
        REFRESH_CROSS_SEARCH,
        REFRESH_BLACKLIST,
        REFRESH_SOURCE,
        CLEAR_INTERNAL_CACHE,
        PRINT_USAGE,
        UPDATE_IP_DB,
        FORCE_RELOAD_IP_DB,
        SLAVE_REFRESH_CROSS_SEARCH,
        SLAVE_REFRESH_LICENSE,
        SLAVE_REFRESH_SOURCE_CACHE_SEARCH,
        SLAVE_REFRESH_SOURCE_CACHE_SERIES,
        SLAVE_REFRESH_CACHE_SYNC_CATALOG,
        SLAVE_REFRESH_CACHE_FULL_CATALOG,
        SLAVE_REFRESH_CACHE_LATEST_UPDATE_CATALOG,
        SLAVE_REFRESH_CACHE_SOURCE_LATEST_UPDATE_FEED,
        SLAVE_REFRESH_CACHE_WEEKLY_FEATURE,
        SLAVE_REFRESH_CACHE_REALTIME_FEATURE,
        REFRESH_FOR_YOU_LIST,
        REFRESH_ADS_CONFIGS,
        REFRESH_ANDROID_UPGRADE,
        REFRESH_BETA_VERSION,
        REFRESH_STICKER_PACKS,
        REFRESH_WALLPAPER_LIST,
        REFRESH_ADDONS_PUSH_PAYLOADS,
        REFRESH_USER_CONTENT_AUDIENCE,
        REFRESH_TEST_USER_CONTENT_AUDIENCE,
        REBUILD_AUDIENCE_CACHE,
        REBUILD_TEST_AUDIENCE_CACHE,
        REFRESH_SUBSCRIPTION_CONFIG,
    ];
}

pub type CommandCallback = Arc<dyn Fn() + Send + Sync>;

/// Command name → callback.
///
/// Unsubscribing leaves an empty slot behind, so repeated unsubscribes and
/// unsubscribing unknown names are harmless.
#[derive(Default)]
pub struct CommandListeners {
    table: RwLock<HashMap<String, Option<CommandCallback>>>,
}

impl CommandListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `command`, replacing any earlier one.
    pub fn subscribe(&self, command: impl Into<String>, callback: impl Fn() + Send + Sync + 'static) {
        self.table.write().insert(command.into(), Some(Arc::new(callback)));
    }

    pub fn unsubscribe(&self, command: &str) {
        self.table.write().insert(command.to_string(), None);
    }

    pub fn callback(&self, command: &str) -> Option<CommandCallback> {
        self.table.read().get(command).cloned().flatten()
    }

    /// Number of commands with a live callback.
    pub fn active(&self) -> usize {
        self.table.read().values().filter(|cb| cb.is_some()).count()
    }
}

impl Dispatch for CommandListeners {
    fn dispatch(&self, command: &str) -> Option<JoinHandle<()>> {
        let callback = self.callback(command)?;
        info!(command, "handling command");
        Some(tokio::spawn(async move { callback() }))
    }
}

/// Bus for named commands broadcast to the whole fleet.
pub struct CommandBus {
    config: BusConfig,
    listeners: Arc<CommandListeners>,
    publisher: Publisher,
}

impl CommandBus {
    pub fn new(config: BusConfig) -> Self {
        let publisher = Publisher::new(&config);
        Self {
            config,
            listeners: Arc::new(CommandListeners::new()),
            publisher,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn listeners(&self) -> &Arc<CommandListeners> {
        &self.listeners
    }

    /// Start listening. Fails when address or channel is empty.
    pub fn start(&self) -> Result<BusHandle, BusError> {
        Listener::spawn(&self.config, self.listeners.clone())
    }

    pub fn subscribe(&self, command: impl Into<String>, callback: impl Fn() + Send + Sync + 'static) {
        self.listeners.subscribe(command, callback);
    }

    pub fn unsubscribe(&self, command: &str) {
        self.listeners.unsubscribe(command);
    }

    /// Broadcast `command`; returns how many instances received it.
    pub async fn send(&self, command: &str) -> Result<usize, BusError> {
        check_config(&self.config)?;
        self.publisher.publish(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(listeners: &CommandListeners, command: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        listeners.subscribe(command, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[tokio::test]
    async fn dispatch_runs_only_the_matching_command() {
        let listeners = CommandListeners::new();
        let a = counter(&listeners, "CommandA");

        assert!(listeners.dispatch("CommandB").is_none());
        assert_eq!(a.load(Ordering::SeqCst), 0);

        listeners.dispatch("CommandA").unwrap().await.unwrap();
        assert_eq!(a.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_suppresses_delivery() {
        let listeners = CommandListeners::new();
        let a = counter(&listeners, "CommandA");
        listeners.dispatch("CommandA").unwrap().await.unwrap();

        listeners.unsubscribe("CommandA");
        listeners.unsubscribe("CommandA");
        listeners.unsubscribe("never-registered");
        assert!(listeners.dispatch("CommandA").is_none());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.active(), 0);
    }

    #[tokio::test]
    async fn later_subscription_replaces_earlier() {
        let listeners = CommandListeners::new();
        let first = counter(&listeners, commands::REBUILD_CACHE);
        let second = counter(&listeners, commands::REBUILD_CACHE);

        listeners.dispatch(commands::REBUILD_CACHE).unwrap().await.unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_callback_does_not_affect_others() {
        let listeners = CommandListeners::new();
        listeners.subscribe("boom", || panic!("callback failure"));
        let ok = counter(&listeners, "ok");

        let boom = listeners.dispatch("boom").unwrap();
        let fine = listeners.dispatch("ok").unwrap();
        assert!(boom.await.is_err());
        fine.await.unwrap();
        assert_eq!(ok.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn well_known_names_are_distinct() {
        let unique: std::collections::HashSet<_> = commands::ALL.iter().collect();
        assert_eq!(unique.len(), commands::ALL.len());
        assert_eq!(commands::ALL.len(), 34);
    }

    #[tokio::test]
    async fn unconfigured_bus_refuses_to_start_or_send() {
        let bus = CommandBus::new(BusConfig::default());
        assert!(matches!(bus.start(), Err(BusError::Config(_))));
        assert!(matches!(bus.send("x").await, Err(BusError::Config(_))));
    }
}
