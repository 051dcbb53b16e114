//! Shared state wiring every component together.
//!
//! Built once at startup from [`AppConfig`] and passed around by `Arc`
//! (or cloned, the client is cheap to clone).

use std::sync::Arc;

use fleetcache_core::CompressionCodec;
use tokio::sync::watch;

use crate::bus::{BusError, BusHandle, CommandBus, EntityBus};
use crate::client::CacheClient;
use crate::config::AppConfig;
use crate::error::CacheError;
use crate::identity::IdentityCache;
use crate::registry::ConnectionRegistry;
use crate::script::ScriptCache;

pub struct CacheContext {
    config: AppConfig,
    registry: Arc<ConnectionRegistry>,
    codec: Arc<CompressionCodec>,
    scripts: Arc<ScriptCache>,
    client: CacheClient,
    command_bus: CommandBus,
    entity_bus: EntityBus,
    identity: Arc<IdentityCache>,
}

impl CacheContext {
    /// Open a pool for every configured connection.
    ///
    /// Pools connect lazily, so this does not touch the network. The buses are
    /// created but not started.
    pub fn from_config(config: AppConfig) -> Result<Self, CacheError> {
        config.validate().map_err(CacheError::Config)?;

        let registry = Arc::new(ConnectionRegistry::new());
        registry.register_all(&config.connections)?;

        let codec = Arc::new(CompressionCodec::new());
        let scripts = Arc::new(ScriptCache::new());
        let client = CacheClient::new(registry.clone(), codec.clone(), scripts.clone());

        Ok(Self {
            command_bus: CommandBus::new(config.command_bus.clone()),
            entity_bus: EntityBus::new(config.entity_bus.clone()),
            identity: Arc::new(IdentityCache::new()),
            config,
            registry,
            codec,
            scripts,
            client,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn codec(&self) -> &Arc<CompressionCodec> {
        &self.codec
    }

    pub fn scripts(&self) -> &Arc<ScriptCache> {
        &self.scripts
    }

    pub fn client(&self) -> &CacheClient {
        &self.client
    }

    pub fn command_bus(&self) -> &CommandBus {
        &self.command_bus
    }

    pub fn entity_bus(&self) -> &EntityBus {
        &self.entity_bus
    }

    pub fn identity(&self) -> &Arc<IdentityCache> {
        &self.identity
    }

    /// Start both bus listeners. Either one missing its address or channel
    /// is a configuration error.
    pub fn start_buses(&self) -> Result<(BusHandle, BusHandle), BusError> {
        let commands = self.command_bus.start()?;
        let entities = self.entity_bus.start()?;
        Ok((commands, entities))
    }

    /// Start the periodic identity sweep at the configured interval.
    #[must_use = "dropping the sender stops the sweeper"]
    pub fn start_identity_sweeper(&self) -> watch::Sender<bool> {
        self.identity
            .start_sweeper(self.config.identity.sweep_interval())
    }
}
