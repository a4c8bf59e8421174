//! Message traits and the type-erased message handle.
//!
//! Application types implement `DomainEvent` or `Command` (both built on
//! `Payload`). Once a message enters the dispatcher it travels as an
//! `AnyMessage`: cheap to clone, carrying its kind and descriptor so routing
//! never needs the static type again.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::types::TypeDescriptor;

/// Anything that can travel through the dispatcher and over the wire.
pub trait Payload: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Runtime descriptor. Override to declare capabilities or generic info.
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>()
    }
}

/// A fact that happened; fanned out to every handler and matching bus.
pub trait DomainEvent: Payload {}

/// An intent; delivered to a single handler.
pub trait Command: Payload {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Event,
    Command,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Event => "event",
            MessageKind::Command => "command",
        }
    }
}

trait ErasedPayload: Any + Send + Sync + fmt::Debug {
    fn to_value(&self) -> serde_json::Result<Value>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Payload> ErasedPayload for T {
    fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type-erased event or command.
#[derive(Clone)]
pub struct AnyMessage {
    kind: MessageKind,
    descriptor: Arc<TypeDescriptor>,
    value: Arc<dyn ErasedPayload>,
}

impl AnyMessage {
    pub fn event<E: DomainEvent>(event: E) -> Self {
        Self {
            kind: MessageKind::Event,
            descriptor: Arc::new(E::descriptor()),
            value: Arc::new(event),
        }
    }

    pub fn command<C: Command>(command: C) -> Self {
        Self {
            kind: MessageKind::Command,
            descriptor: Arc::new(C::descriptor()),
            value: Arc::new(command),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_event(&self) -> bool {
        self.kind == MessageKind::Event
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Qualified type name, used as the wire discriminator.
    pub fn type_name(&self) -> &'static str {
        self.descriptor.name()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }

    pub fn to_json_value(&self) -> serde_json::Result<Value> {
        self.value.to_value()
    }
}

impl fmt::Debug for AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyMessage")
            .field("kind", &self.kind)
            .field("type", &self.descriptor.name())
            .field("value", &self.value)
            .finish()
    }
}
