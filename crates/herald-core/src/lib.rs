//! Herald core: transport-agnostic primitives shared by the dispatcher and the
//! broker transports.
//!
//! This crate defines the wire-level Envelope, the error surface, the runtime
//! type descriptors used for routing, and the serializer capability. It carries
//! no runtime or broker dependencies so it can be reused by every transport.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Malformed wire input surfaces as `HeraldError`/`Result` so a consumer loop
//! never crashes on hostile or foreign traffic.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod catalog;
pub mod envelope;
pub mod error;
pub mod message;
pub mod serializer;
pub mod types;

pub use catalog::{CatalogEntry, TypeCatalog};
pub use envelope::Envelope;
pub use error::{ErrorKind, HeraldError, Result};
pub use message::{AnyMessage, Command, DomainEvent, MessageKind, Payload};
pub use serializer::{JsonSerializer, Serializer};
pub use types::{GenericArgs, TypeDescriptor};
