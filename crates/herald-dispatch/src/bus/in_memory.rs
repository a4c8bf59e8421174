//! In-memory bus: local fan-out over the handler registry.
//!
//! Transports use it on the receiving side to hand decoded messages to the
//! handlers of this process. Routed to as a `Bus`, it reaches another
//! dispatcher's handlers; the dispatcher owning the registry skips it.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;

use herald_core::error::{HeraldError, Result};
use herald_core::message::AnyMessage;

use super::{Bus, PublishContext};
use crate::handlers::HandlerRegistry;

/// Deliver an event to every local handler.
#[async_trait]
pub trait InMemoryEventBus: Send + Sync {
    async fn publish(&self, event: &AnyMessage) -> Result<()>;
}

/// Deliver a command to its local handler.
#[async_trait]
pub trait InMemoryCommandBus: Send + Sync {
    async fn dispatch(&self, command: &AnyMessage) -> Result<()>;
}

#[derive(Clone)]
pub struct InMemoryBus {
    handlers: Arc<HandlerRegistry>,
}

impl InMemoryBus {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl InMemoryEventBus for InMemoryBus {
    async fn publish(&self, event: &AnyMessage) -> Result<()> {
        let handlers = self.handlers.find_handlers_for(event.descriptor().id());
        if handlers.is_empty() {
            tracing::debug!(event_type = %event.type_name(), "no local handler for event");
            return Ok(());
        }

        let results = join_all(handlers.iter().map(|h| h.invoke(event))).await;
        let mut failed = 0usize;
        for (h, res) in handlers.iter().zip(results) {
            if let Err(e) = res {
                tracing::error!(handler_id = h.id().get(), event_type = %event.type_name(), error = %e, "event handler failed");
                failed += 1;
            }
        }

        if failed == 0 {
            Ok(())
        } else {
            Err(HeraldError::Handler(format!(
                "{failed} of {} handlers failed for {}",
                handlers.len(),
                event.type_name()
            )))
        }
    }
}

#[async_trait]
impl InMemoryCommandBus for InMemoryBus {
    async fn dispatch(&self, command: &AnyMessage) -> Result<()> {
        let handler = self
            .handlers
            .find_handler_for(command.descriptor().id())
            .ok_or_else(|| HeraldError::NoHandler(command.type_name().to_string()))?;
        handler.invoke(command).await.map_err(|e| {
            tracing::error!(handler_id = handler.id().get(), command_type = %command.type_name(), error = %e, "command handler failed");
            e
        })
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish_event(&self, event: &AnyMessage, _ctx: &PublishContext) -> Result<()> {
        InMemoryEventBus::publish(self, event).await
    }

    async fn dispatch_command(&self, command: &AnyMessage, _ctx: &PublishContext) -> Result<()> {
        InMemoryCommandBus::dispatch(self, command).await
    }

    fn local_handlers(&self) -> Option<&Arc<HandlerRegistry>> {
        Some(&self.handlers)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::handlers::{CommandHandler, EventHandler};
    use herald_core::message::{Command, DomainEvent, Payload};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Charged;
    impl Payload for Charged {}
    impl DomainEvent for Charged {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Charge;
    impl Payload for Charge {}
    impl Command for Charge {}

    struct Accepting;
    struct Failing;

    #[async_trait]
    impl EventHandler<Charged> for Accepting {
        async fn handle(&self, _: &Charged) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl EventHandler<Charged> for Failing {
        async fn handle(&self, _: &Charged) -> Result<()> {
            Err(HeraldError::handler("card declined"))
        }
    }

    #[async_trait]
    impl CommandHandler<Charge> for Accepting {
        async fn handle(&self, _: &Charge) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn one_failing_handler_fails_the_publish() {
        let reg = HandlerRegistry::new();
        let ok = Arc::new(Accepting);
        let bad = Arc::new(Failing);
        let _a = reg.add_event_handler::<Charged, _>(&ok);
        let _b = reg.add_event_handler::<Charged, _>(&bad);

        let bus = InMemoryBus::new(reg);
        let err = InMemoryEventBus::publish(&bus, &AnyMessage::event(Charged)).await.unwrap_err();
        assert_eq!(err.kind().as_str(), "HANDLER");
    }

    #[tokio::test]
    async fn command_without_handler_is_an_error() {
        let bus = InMemoryBus::new(HandlerRegistry::new());
        let err = bus.dispatch(&AnyMessage::command(Charge)).await.unwrap_err();
        assert_eq!(err.kind().as_str(), "NO_HANDLER");

        let reg = HandlerRegistry::new();
        let h = Arc::new(Accepting);
        let _r = reg.add_command_handler::<Charge, _>(&h);
        InMemoryBus::new(reg).dispatch(&AnyMessage::command(Charge)).await.unwrap();
    }
}
