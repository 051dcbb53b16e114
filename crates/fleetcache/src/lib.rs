//! Redis access and fleet-wide command buses for horizontally scaled services.
//!
//! - [`CacheClient`]: typed reads and writes by connection id, pipelined bulk
//!   forms and script-backed multi-key hash reads
//! - [`CommandBus`] / [`EntityBus`]: pub/sub broadcast of named commands and
//!   entity updates to every instance
//! - [`IdentityCache`]: verified token → subject memo with periodic expiry
//!
//! [`CacheContext`] builds all of them from an [`AppConfig`].

pub mod bus;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod script;
pub mod value;

#[cfg(test)]
mod testing;

pub use bus::{BusError, BusHandle, CommandBus, EntityBus, commands};
pub use client::{CacheClient, HashItem};
pub use config::AppConfig;
pub use context::CacheContext;
pub use error::CacheError;
pub use identity::{IdentityCache, TokenVerifier, VerifiedToken};
pub use pipeline::Batch;
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionSettings};
pub use script::{FieldMap, ScriptCache};
pub use value::CacheValue;

pub use fleetcache_core::{CompressionCodec, EntityId, entity_type, fingerprint};
