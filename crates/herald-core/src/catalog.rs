//! Receiver-side type catalog: qualified wire name -> decoder.
//!
//! A process only understands the wire types it registered. Lookup of an
//! unknown name is a routing miss (`None`), not an error.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::error::Result;
use crate::message::{AnyMessage, Command, DomainEvent, MessageKind};
use crate::types::TypeDescriptor;

type Decoder = Arc<dyn Fn(Value) -> Result<AnyMessage> + Send + Sync>;

/// One registered wire type.
#[derive(Clone)]
pub struct CatalogEntry {
    kind: MessageKind,
    descriptor: Arc<TypeDescriptor>,
    decode: Decoder,
}

impl CatalogEntry {
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Build the typed message from an already parsed JSON value.
    pub fn decode(&self, value: Value) -> Result<AnyMessage> {
        (self.decode)(value)
    }
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("kind", &self.kind)
            .field("type", &self.descriptor.name())
            .finish()
    }
}

#[derive(Default)]
pub struct TypeCatalog {
    entries: DashMap<&'static str, CatalogEntry>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn register_event<E: DomainEvent>(&self) -> &Self {
        let descriptor = E::descriptor();
        let entry = CatalogEntry {
            kind: MessageKind::Event,
            descriptor: Arc::new(descriptor.clone()),
            decode: Arc::new(|v: Value| -> Result<AnyMessage> {
                Ok(AnyMessage::event(serde_json::from_value::<E>(v)?))
            }),
        };
        self.entries.insert(descriptor.name(), entry);
        self
    }

    pub fn register_command<C: Command>(&self) -> &Self {
        let descriptor = C::descriptor();
        let entry = CatalogEntry {
            kind: MessageKind::Command,
            descriptor: Arc::new(descriptor.clone()),
            decode: Arc::new(|v: Value| -> Result<AnyMessage> {
                Ok(AnyMessage::command(serde_json::from_value::<C>(v)?))
            }),
        };
        self.entries.insert(descriptor.name(), entry);
        self
    }

    /// Resolve a wire type name. `None` means "not loaded in this process".
    pub fn resolve(&self, type_name: &str) -> Option<CatalogEntry> {
        self.entries.get(type_name).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
