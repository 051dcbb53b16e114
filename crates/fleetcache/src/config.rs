use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::registry::{ConnectionId, ConnectionSettings};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Remote stores addressed by connection id
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    /// Generic command bus
    #[serde(default = "default_command_bus", deserialize_with = "command_bus_section")]
    pub command_bus: BusConfig,
    /// Entity-update fan-out bus
    #[serde(default = "default_entity_bus", deserialize_with = "entity_bus_section")]
    pub entity_bus: BusConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            connections: Vec::new(),
            command_bus: default_command_bus(),
            entity_bus: default_entity_bus(),
            identity: IdentityConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Connection validations
        let mut seen = HashSet::new();
        for conn in &self.connections {
            if !seen.insert(conn.id) {
                return Err(format!("connections: duplicate id {}", conn.id));
            }
            if conn.address.trim().is_empty() {
                return Err(format!("connections[{}].address must not be empty", conn.id));
            }
            if conn.timeout_ms == 0 {
                return Err(format!("connections[{}].timeout_ms must be > 0", conn.id));
            }
            if conn.pool_size == 0 {
                return Err(format!("connections[{}].pool_size must be > 0", conn.id));
            }
        }
        if self.identity.sweep_interval_secs == 0 {
            return Err("identity.sweep_interval_secs must be > 0".into());
        }
        Ok(())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub id: ConnectionId,

    /// `host:port` or a full `redis://` URL
    pub address: String,

    #[serde(default)]
    pub db: i64,

    /// Per-operation timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// TTL applied by plain writes and "touch" after hash/set writes
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_ttl_secs() -> u64 {
    600
}

fn default_pool_size() -> usize {
    16
}

impl ConnectionConfig {
    pub fn settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            address: self.address.clone(),
            db: self.db,
            timeout: Duration::from_millis(self.timeout_ms),
            default_ttl: Duration::from_secs(self.ttl_secs),
            pool_size: self.pool_size,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusConfig {
    /// Address of the store carrying the channel; empty disables the bus
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub channel: String,
    /// Keepalive interval in seconds, 0 disables it
    #[serde(default)]
    pub keepalive_secs: u64,
}

impl BusConfig {
    pub fn new(address: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            channel: channel.into(),
            keepalive_secs: 0,
        }
    }

    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive_secs = interval.as_secs();
        self
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }

    pub fn is_configured(&self) -> bool {
        !self.address.trim().is_empty() && !self.channel.trim().is_empty()
    }
}

const COMMAND_BUS_KEEPALIVE_SECS: u64 = 60;
const ENTITY_BUS_KEEPALIVE_SECS: u64 = 0;

fn default_command_bus() -> BusConfig {
    BusSection::default().into_bus(COMMAND_BUS_KEEPALIVE_SECS)
}

fn default_entity_bus() -> BusConfig {
    BusSection::default().into_bus(ENTITY_BUS_KEEPALIVE_SECS)
}

/// Raw bus table; the keepalive default differs per bus, so a missing
/// `keepalive_secs` is resolved by the field it lands in.
#[derive(Default, Deserialize)]
struct BusSection {
    #[serde(default)]
    address: String,
    #[serde(default)]
    channel: String,
    keepalive_secs: Option<u64>,
}

impl BusSection {
    fn into_bus(self, default_keepalive_secs: u64) -> BusConfig {
        BusConfig {
            address: self.address,
            channel: self.channel,
            keepalive_secs: self.keepalive_secs.unwrap_or(default_keepalive_secs),
        }
    }
}

fn command_bus_section<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BusConfig, D::Error> {
    BusSection::deserialize(deserializer).map(|s| s.into_bus(COMMAND_BUS_KEEPALIVE_SECS))
}

fn entity_bus_section<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BusConfig, D::Error> {
    BusSection::deserialize(deserializer).map(|s| s.into_bus(ENTITY_BUS_KEEPALIVE_SECS))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl IdentityConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "fleetcache.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(format!("config file not found: {p}"));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., FLEETCACHE__COMMAND_BUS__CHANNEL=mrchannel
        builder = builder.add_source(
            Environment::with_prefix("FLEETCACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
