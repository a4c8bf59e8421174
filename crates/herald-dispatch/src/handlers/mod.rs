//! Local handler capability and the weak handler registry.

mod registry;

use async_trait::async_trait;

use herald_core::error::Result;
use herald_core::message::{Command, DomainEvent};

pub use registry::{HandlerId, HandlerRegistration, HandlerRegistry, LiveHandler};

/// Handles every dispatched `E`.
#[async_trait]
pub trait EventHandler<E: DomainEvent>: Send + Sync + 'static {
    async fn handle(&self, event: &E) -> Result<()>;
}

/// Handles dispatched `C`. Only the first live handler of a command type runs.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    async fn handle(&self, command: &C) -> Result<()>;
}
