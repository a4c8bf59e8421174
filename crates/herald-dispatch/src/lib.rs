//! Herald dispatch: in-process routing of events and commands.
//!
//! This crate wires the type router, the weak handler registry, the bus
//! abstraction and the dispatcher into one pipeline. Transports (RabbitMQ and
//! friends) plug in as `Bus` implementations and consume the in-memory bus
//! capability on the receiving side.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod obs;
pub mod routing;

pub use bus::{Bus, BusKey, BusRegistry, BusResolver, InMemoryBus, InMemoryCommandBus, InMemoryEventBus, PublishContext};
pub use config::{DispatcherSettings, HeraldConfig};
pub use dispatch::{AwaitOutcome, CommandAwaiter, DispatchReport, Dispatcher};
pub use handlers::{CommandHandler, EventHandler, HandlerId, HandlerRegistration, HandlerRegistry};
pub use routing::{BusTarget, DispatchConfiguration, DispatcherConfiguration, RouteMatcher, TypeRouter};
