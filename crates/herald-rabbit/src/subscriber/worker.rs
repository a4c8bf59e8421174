//! Per-delivery processing and the ack decision.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;

use herald_core::catalog::TypeCatalog;
use herald_core::envelope::Envelope;
use herald_core::error::{HeraldError, Result};
use herald_core::message::{AnyMessage, MessageKind};
use herald_core::serializer::Serializer;
use herald_dispatch::bus::{InMemoryCommandBus, InMemoryEventBus};

use super::metrics::SubscriberMetrics;
use crate::broker::InboundDelivery;
use crate::config::{AckStrategy, ReceiveCallback};

/// Sees every dispatchable envelope from another service, before type
/// resolution.
pub type EnvelopeObserver = Arc<dyn Fn(&Envelope) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Processed,
    Failed,
    /// Settled without dispatch; never a failure.
    Dropped(&'static str),
}

#[derive(Clone)]
pub(crate) struct Processor {
    pub service_id: String,
    pub ack_strategy: AckStrategy,
    pub dispatch_in_memory: bool,
    pub event_callback: Option<ReceiveCallback>,
    pub command_callback: Option<ReceiveCallback>,
    pub catalog: Arc<TypeCatalog>,
    pub serializer: Arc<dyn Serializer>,
    pub event_bus: Option<Arc<dyn InMemoryEventBus>>,
    pub command_bus: Option<Arc<dyn InMemoryCommandBus>>,
    pub observer: Option<EnvelopeObserver>,
    pub metrics: Arc<SubscriberMetrics>,
}

impl Processor {
    /// Process one delivery and settle it. Never fails: every error ends in
    /// the ack decision.
    pub async fn handle(&self, queue: &str, delivery: InboundDelivery) {
        let started = Instant::now();
        self.metrics.received.inc(&[("queue", queue)]);

        let envelope = match Envelope::from_slice(&delivery.body) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(queue, error = %e, "malformed delivery, rejecting without requeue");
                self.metrics.dropped.inc(&[("queue", queue), ("reason", "malformed")]);
                self.settle(queue, &delivery, false).await;
                return;
            }
        };

        let ack_first = self.ack_strategy == AckStrategy::AckOnReceive;
        if ack_first {
            self.settle(queue, &delivery, true).await;
        }

        let outcome = AssertUnwindSafe(self.process(&envelope))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!(queue, message_type = %envelope.data_type, "message processing panicked");
                Outcome::Failed
            });

        match outcome {
            Outcome::Processed => {}
            Outcome::Failed => {
                self.metrics.failures.inc(&[("queue", queue)]);
            }
            Outcome::Dropped(reason) => {
                self.metrics.dropped.inc(&[("queue", queue), ("reason", reason)]);
            }
        }

        if !ack_first {
            self.settle(queue, &delivery, outcome != Outcome::Failed).await;
        }
        self.metrics.observe_processing(queue, started.elapsed());
    }

    async fn process(&self, envelope: &Envelope) -> Outcome {
        if !envelope.is_dispatchable() {
            tracing::debug!("envelope without data or type, dropped");
            return Outcome::Dropped("undispatchable");
        }
        if envelope.emiter == self.service_id {
            tracing::trace!(message_type = %envelope.data_type, "own message, skipped");
            return Outcome::Dropped("own_message");
        }

        if let Some(observe) = &self.observer {
            observe(envelope);
        }

        let Some(entry) = self.catalog.resolve(&envelope.data_type) else {
            tracing::debug!(message_type = %envelope.data_type, emiter = %envelope.emiter, "unknown message type, dropped");
            return Outcome::Dropped("unknown_type");
        };

        let message = match self.serializer.deserialize(&envelope.data, &entry) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(message_type = %envelope.data_type, error = %e, "payload decode failed");
                return Outcome::Failed;
            }
        };

        let ok = match message.kind() {
            MessageKind::Event => self.deliver_event(message).await,
            MessageKind::Command => self.deliver_command(message).await,
        };
        if ok {
            Outcome::Processed
        } else {
            Outcome::Failed
        }
    }

    async fn deliver_event(&self, event: AnyMessage) -> bool {
        let mut ok = run_callback(self.event_callback.as_ref(), &event).await;
        if self.dispatch_in_memory {
            if let Some(bus) = &self.event_bus {
                if let Err(e) = bus.publish(&event).await {
                    tracing::error!(event_type = %event.type_name(), error = %e, "in-memory event dispatch failed");
                    ok = false;
                }
            }
        }
        ok
    }

    async fn deliver_command(&self, command: AnyMessage) -> bool {
        let mut ok = run_callback(self.command_callback.as_ref(), &command).await;
        if self.dispatch_in_memory {
            if let Some(bus) = &self.command_bus {
                if let Err(e) = bus.dispatch(&command).await {
                    tracing::error!(command_type = %command.type_name(), error = %e, "in-memory command dispatch failed");
                    ok = false;
                }
            }
        }
        ok
    }

    async fn settle(&self, queue: &str, delivery: &InboundDelivery, ack: bool) {
        let res = if ack {
            self.metrics.acked.inc(&[("queue", queue)]);
            delivery.acker.ack().await
        } else {
            self.metrics.rejected.inc(&[("queue", queue)]);
            delivery.acker.reject().await
        };
        if let Err(e) = res {
            tracing::warn!(queue, ack, error = %e, "delivery settlement failed");
        }
    }
}

async fn run_callback(callback: Option<&ReceiveCallback>, message: &AnyMessage) -> bool {
    let Some(cb) = callback else {
        return true;
    };
    let res: Result<()> = AssertUnwindSafe(cb(message.clone()))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(HeraldError::Internal("receive callback panicked".into())));
    match res {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(
                message_type = %message.type_name(),
                kind = message.kind().as_str(),
                error = %e,
                "receive callback failed"
            );
            false
        }
    }
}
