#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::any::TypeId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use herald_core::error::Result;
use herald_core::message::{DomainEvent, Payload};
use herald_dispatch::{Dispatcher, DispatcherSettings, EventHandler, HandlerRegistry};

#[derive(Debug, Serialize, Deserialize)]
struct Pinged;
impl Payload for Pinged {}
impl DomainEvent for Pinged {}

#[derive(Default)]
struct Listener(AtomicUsize);

#[async_trait]
impl EventHandler<Pinged> for Listener {
    async fn handle(&self, _: &Pinged) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn dropped_handler_is_never_invoked_again() {
    let d = Dispatcher::new(DispatcherSettings::default(), None, None);
    let kept = Arc::new(Listener::default());
    let gone = Arc::new(Listener::default());
    d.add_event_handler::<Pinged, _>(&kept).keep();
    d.add_event_handler::<Pinged, _>(&gone).keep();

    let report = d.dispatch_event(Pinged).await;
    assert_eq!(report.handlers_invoked, 2);

    drop(gone);
    let report = d.dispatch_event(Pinged).await;
    assert_eq!(report.handlers_invoked, 1);
    assert_eq!(kept.0.load(Ordering::SeqCst), 2);
    // the lookup pruned the dead entry
    assert_eq!(d.handlers().len(), 1);
}

#[tokio::test]
async fn registration_guard_unregisters_on_drop() {
    let d = Dispatcher::new(DispatcherSettings::default(), None, None);
    let h = Arc::new(Listener::default());
    {
        let _guard = d.add_event_handler::<Pinged, _>(&h);
        d.dispatch_event(Pinged).await;
    }
    d.dispatch_event(Pinged).await;
    assert_eq!(h.0.load(Ordering::SeqCst), 1);
    assert!(d.handlers().is_empty());
}

#[tokio::test]
async fn remove_by_id_and_by_instance() {
    let d = Dispatcher::new(DispatcherSettings::default(), None, None);
    let a = Arc::new(Listener::default());
    let b = Arc::new(Listener::default());
    let id = d.add_event_handler::<Pinged, _>(&a).keep();
    d.add_event_handler::<Pinged, _>(&b).keep();

    assert!(d.remove_handler(id));
    assert!(!d.remove_handler(id));
    assert!(d.remove_handler_instance(&b));
    assert!(d.handlers().is_empty());
}

#[test]
fn concurrent_add_and_remove_keep_the_registry_consistent() {
    let reg = HandlerRegistry::new();
    let handlers: Vec<Arc<Listener>> = (0..64).map(|_| Arc::new(Listener::default())).collect();

    std::thread::scope(|s| {
        for chunk in handlers.chunks(8) {
            let reg = Arc::clone(&reg);
            s.spawn(move || {
                for h in chunk {
                    let id = reg.add_event_handler::<Pinged, _>(h).keep();
                    let _ = reg.find_handlers_for(TypeId::of::<Pinged>());
                    if id.get() % 2 == 0 {
                        assert!(reg.remove(id));
                    }
                }
            });
        }
    });

    let live = reg.find_handlers_for(TypeId::of::<Pinged>());
    assert_eq!(live.len(), reg.len());
    assert_eq!(live.len(), 32);
}
