#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use herald_core::message::{DomainEvent, MessageKind, Payload};
use herald_core::types::TypeDescriptor;
use herald_dispatch::bus::BusKey;
use herald_dispatch::routing::{BusTarget, DispatcherConfiguration, TypeRouter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct ConcreteFoo;

#[derive(Debug, Serialize, Deserialize)]
struct Unrelated;

#[derive(Debug, Serialize, Deserialize)]
struct Notification<T> {
    inner: T,
}

impl Payload for Notification<ConcreteFoo> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>().generic(
            "Notification",
            [TypeDescriptor::of::<ConcreteFoo>().implementing(["IFoo"])],
        )
    }
}
impl DomainEvent for Notification<ConcreteFoo> {}

impl Payload for Notification<Unrelated> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>().generic("Notification", [TypeDescriptor::of::<Unrelated>()])
    }
}
impl DomainEvent for Notification<Unrelated> {}

#[derive(Debug, Serialize, Deserialize)]
struct Plain;
impl Payload for Plain {}
impl DomainEvent for Plain {}

fn keys(router: &TypeRouter, desc: &TypeDescriptor) -> Vec<String> {
    router
        .resolve(MessageKind::Event, desc)
        .bus_targets()
        .iter()
        .map(|t| t.key().to_string())
        .collect()
}

#[test]
fn open_generic_route_honors_constraints() {
    let cfg = DispatcherConfiguration::builder()
        .for_generic_events("Notification", [Some("IFoo")], |r| r.to(BusTarget::new(BusKey::named("foo-bus"))))
        .build();
    let router = TypeRouter::new(cfg);

    assert_eq!(keys(&router, &Notification::<ConcreteFoo>::descriptor()), vec!["foo-bus"]);
    assert!(keys(&router, &Notification::<Unrelated>::descriptor()).is_empty());
    assert!(keys(&router, &Plain::descriptor()).is_empty());
}

#[test]
fn unconstrained_generic_matches_any_argument() {
    let cfg = DispatcherConfiguration::builder()
        .for_generic_events("Notification", [None], |r| r.to(BusTarget::new(BusKey::named("any"))))
        .build();
    let router = TypeRouter::new(cfg);

    assert_eq!(keys(&router, &Notification::<Unrelated>::descriptor()), vec!["any"]);
}

#[test]
fn exact_route_wins_over_generic() {
    let cfg = DispatcherConfiguration::builder()
        .for_generic_events("Notification", [None], |r| r.to(BusTarget::new(BusKey::named("generic"))))
        .for_event::<Notification<ConcreteFoo>>(|r| r.to(BusTarget::new(BusKey::named("exact"))))
        .build();
    let router = TypeRouter::new(cfg);

    assert_eq!(keys(&router, &Notification::<ConcreteFoo>::descriptor()), vec!["exact"]);
    assert_eq!(keys(&router, &Notification::<Unrelated>::descriptor()), vec!["generic"]);
}

#[test]
fn catch_all_adds_to_specific_routes() {
    let cfg = DispatcherConfiguration::builder()
        .for_event::<Plain>(|r| r.to(BusTarget::new(BusKey::named("audit"))))
        .for_all_events(|r| r.to(BusTarget::new(BusKey::named("rabbit"))))
        .build();
    let router = TypeRouter::new(cfg);

    assert_eq!(keys(&router, &Plain::descriptor()), vec!["audit", "rabbit"]);
    assert_eq!(keys(&router, &Notification::<Unrelated>::descriptor()), vec!["rabbit"]);
}
