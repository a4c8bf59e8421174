//! Bus abstraction: outbound transports the dispatcher fans out to.
//!
//! A bus is identified by a `BusKey` (by default its Rust type name). The
//! dispatcher never owns buses; it asks a `BusResolver` for an instance at
//! dispatch time.

mod in_memory;
mod registry;

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use herald_core::error::{HeraldError, Result};
use herald_core::message::AnyMessage;
use herald_core::serializer::Serializer;

use crate::handlers::HandlerRegistry;

pub use in_memory::{InMemoryBus, InMemoryCommandBus, InMemoryEventBus};
pub use registry::BusRegistry;

/// Identity of a bus type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusKey(Cow<'static, str>);

impl BusKey {
    pub fn of<B: ?Sized + 'static>() -> Self {
        BusKey(Cow::Borrowed(std::any::type_name::<B>()))
    }

    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        BusKey(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-target publish options resolved from the routing configuration.
#[derive(Clone, Default)]
pub struct PublishContext {
    /// Overrides the bus' own serializer when set.
    pub serializer: Option<Arc<dyn Serializer>>,
}

#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish_event(&self, event: &AnyMessage, ctx: &PublishContext) -> Result<()>;

    /// Publish several events. The default publishes one by one and keeps
    /// going after a failure; the result is the AND of all publishes.
    async fn publish_event_range(&self, events: &[AnyMessage], ctx: &PublishContext) -> Result<()> {
        let mut failed = 0usize;
        for event in events {
            if let Err(e) = self.publish_event(event, ctx).await {
                tracing::error!(event_type = %event.type_name(), error = %e, "event publish failed");
                failed += 1;
            }
        }
        if failed == 0 {
            Ok(())
        } else {
            Err(HeraldError::Transport(format!(
                "{failed} of {} events failed to publish",
                events.len()
            )))
        }
    }

    async fn dispatch_command(&self, command: &AnyMessage, ctx: &PublishContext) -> Result<()>;

    /// The handler registry this bus delivers to, when it is a local bus.
    /// A dispatcher never fans out to a bus over its own registry: its
    /// handlers were already invoked directly.
    fn local_handlers(&self) -> Option<&Arc<HandlerRegistry>> {
        None
    }
}

/// Resolves bus instances by key.
pub trait BusResolver: Send + Sync {
    fn resolve(&self, key: &BusKey) -> Option<Arc<dyn Bus>>;

    /// Every bus this resolver can produce, in registration order.
    fn available(&self) -> Vec<BusKey>;
}
