//! Entity-update fan-out.
//!
//! Payloads are entity ids such as `mrs-serie-123`. The id's type prefix
//! (`mrs-serie`) selects one callback; callbacks registered with
//! [`EntityBus::subscribe_all`] see every id.

use std::collections::HashMap;
use std::sync::Arc;

use fleetcache_core::entity_type;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{BusError, BusHandle, Dispatch, Listener, Publisher, check_config};
use crate::config::BusConfig;

pub type EntityCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct EntityListeners {
    by_type: RwLock<HashMap<String, Option<EntityCallback>>>,
    all: RwLock<Vec<EntityCallback>>,
}

impl EntityListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for ids of `entity_type`, replacing any earlier one.
    pub fn subscribe(&self, entity_type: impl Into<String>, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.by_type
            .write()
            .insert(entity_type.into(), Some(Arc::new(callback)));
    }

    pub fn unsubscribe(&self, entity_type: &str) {
        self.by_type.write().insert(entity_type.to_string(), None);
    }

    /// Register `callback` for every entity id.
    pub fn subscribe_all(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.all.write().push(Arc::new(callback));
    }

    /// The callbacks an id is delivered to: its type's callback first.
    fn callbacks_for(&self, id: &str) -> Vec<EntityCallback> {
        let typed = self.by_type.read().get(entity_type(id)).cloned().flatten();
        let all = self.all.read();
        typed.into_iter().chain(all.iter().cloned()).collect()
    }
}

impl Dispatch for EntityListeners {
    fn dispatch(&self, id: &str) -> Option<JoinHandle<()>> {
        let callbacks = self.callbacks_for(id);
        if callbacks.is_empty() {
            return None;
        }
        debug!(entity = id, callbacks = callbacks.len(), "handling entity update");
        let id = id.to_string();
        Some(tokio::spawn(async move {
            for callback in callbacks {
                callback(&id);
            }
        }))
    }
}

/// Bus announcing entity updates to the whole fleet.
pub struct EntityBus {
    config: BusConfig,
    listeners: Arc<EntityListeners>,
    publisher: Publisher,
}

impl EntityBus {
    pub fn new(config: BusConfig) -> Self {
        let publisher = Publisher::new(&config);
        Self {
            config,
            listeners: Arc::new(EntityListeners::new()),
            publisher,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn listeners(&self) -> &Arc<EntityListeners> {
        &self.listeners
    }

    pub fn start(&self) -> Result<BusHandle, BusError> {
        Listener::spawn(&self.config, self.listeners.clone())
    }

    pub fn subscribe(&self, entity_type: impl Into<String>, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.listeners.subscribe(entity_type, callback);
    }

    pub fn unsubscribe(&self, entity_type: &str) {
        self.listeners.unsubscribe(entity_type);
    }

    pub fn subscribe_all(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.listeners.subscribe_all(callback);
    }

    /// Announce that `id` changed; returns how many instances received it.
    pub async fn send(&self, id: &str) -> Result<usize, BusError> {
        check_config(&self.config)?;
        self.publisher.publish(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(listeners: &EntityListeners, entity_type: &str) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        listeners.subscribe(entity_type, move |id| s.lock().push(id.to_string()));
        seen
    }

    #[tokio::test]
    async fn type_prefix_selects_the_callback() {
        let listeners = EntityListeners::new();
        let series = recorder(&listeners, "mrs-serie");

        assert!(listeners.dispatch("mrs-chapter-123").is_none());
        listeners.dispatch("mrs-serie-123").unwrap().await.unwrap();

        assert_eq!(*series.lock(), vec!["mrs-serie-123"]);
    }

    #[tokio::test]
    async fn listen_all_sees_every_id_after_the_typed_callback() {
        let listeners = EntityListeners::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        listeners.subscribe("mrs-serie", move |id| o.lock().push(format!("typed:{id}")));
        let o = order.clone();
        listeners.subscribe_all(move |id| o.lock().push(format!("all:{id}")));

        listeners.dispatch("mrs-serie-1").unwrap().await.unwrap();
        listeners.dispatch("mrs-chapter-2").unwrap().await.unwrap();

        assert_eq!(
            *order.lock(),
            vec!["typed:mrs-serie-1", "all:mrs-serie-1", "all:mrs-chapter-2"]
        );
    }

    #[tokio::test]
    async fn unsubscribe_suppresses_delivery() {
        let listeners = EntityListeners::new();
        let series = recorder(&listeners, "mrs-serie");
        listeners.dispatch("mrs-serie-123").unwrap().await.unwrap();

        listeners.unsubscribe("mrs-serie");
        assert!(listeners.dispatch("mrs-serie-123").is_none());
        assert_eq!(series.lock().len(), 1);
    }

    #[tokio::test]
    async fn unconfigured_bus_refuses_to_start() {
        let bus = EntityBus::new(BusConfig::new("127.0.0.1:6379", ""));
        assert!(matches!(bus.start(), Err(BusError::Config(_))));
    }
}
