use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::{Bus, BusKey, BusResolver};

#[derive(Clone)]
struct BusEntry {
    bus: Arc<dyn Bus>,
    registered_seq: u64,
}

/// Bus registry:
/// - `BusKey -> Arc<dyn Bus>`
/// - registration order is kept so the default route-all configuration is
///   deterministic.
#[derive(Default)]
pub struct BusRegistry {
    buses: DashMap<BusKey, BusEntry>,
    seq: AtomicU64,
}

impl BusRegistry {
    pub fn new() -> Self {
        Self {
            buses: DashMap::new(),
            seq: AtomicU64::new(1),
        }
    }

    /// Register under the bus' type name.
    pub fn register<B: Bus + 'static>(&self, bus: Arc<B>) -> BusKey {
        let key = BusKey::of::<B>();
        self.register_as(key.clone(), bus);
        key
    }

    /// Register under an explicit key. Re-registering a key replaces the
    /// instance but keeps its original position.
    pub fn register_as(&self, key: BusKey, bus: Arc<dyn Bus>) {
        let registered_seq = match self.buses.get(&key) {
            Some(existing) => existing.registered_seq,
            None => self.seq.fetch_add(1, Ordering::Relaxed),
        };
        self.buses.insert(key, BusEntry { bus, registered_seq });
    }

    pub fn remove(&self, key: &BusKey) -> Option<Arc<dyn Bus>> {
        self.buses.remove(key).map(|(_, e)| e.bus)
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}

impl BusResolver for BusRegistry {
    fn resolve(&self, key: &BusKey) -> Option<Arc<dyn Bus>> {
        self.buses.get(key).map(|e| Arc::clone(&e.value().bus))
    }

    fn available(&self) -> Vec<BusKey> {
        let mut keys: Vec<(u64, BusKey)> = self
            .buses
            .iter()
            .map(|e| (e.value().registered_seq, e.key().clone()))
            .collect();
        keys.sort_by_key(|(seq, _)| *seq);
        keys.into_iter().map(|(_, k)| k).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use herald_core::message::AnyMessage;
    use herald_core::Result;

    use crate::bus::PublishContext;

    struct First;
    struct Second;

    #[async_trait]
    impl Bus for First {
        async fn publish_event(&self, _: &AnyMessage, _: &PublishContext) -> Result<()> {
            Ok(())
        }
        async fn dispatch_command(&self, _: &AnyMessage, _: &PublishContext) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Bus for Second {
        async fn publish_event(&self, _: &AnyMessage, _: &PublishContext) -> Result<()> {
            Ok(())
        }
        async fn dispatch_command(&self, _: &AnyMessage, _: &PublishContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn available_keeps_registration_order() {
        let reg = BusRegistry::new();
        let b = reg.register(Arc::new(Second));
        let a = reg.register(Arc::new(First));
        reg.register(Arc::new(Second));
        assert_eq!(reg.available(), vec![b, a]);
    }

    #[test]
    fn unknown_key_resolves_to_none() {
        let reg = BusRegistry::new();
        assert!(reg.resolve(&BusKey::named("missing")).is_none());
    }
}
