//! Serializer capability.
//!
//! The dispatcher and transports treat (de)serialization as an opaque
//! capability so a bus target can carry its own format.

use crate::catalog::CatalogEntry;
use crate::error::{HeraldError, Result};
use crate::message::AnyMessage;

pub trait Serializer: Send + Sync {
    /// Serialize the payload (not the envelope) to text.
    fn serialize(&self, message: &AnyMessage) -> Result<String>;

    /// Rebuild a typed message from text produced by `serialize`.
    fn deserialize(&self, data: &str, entry: &CatalogEntry) -> Result<AnyMessage>;
}

/// `serde_json` based serializer (compact output).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, message: &AnyMessage) -> Result<String> {
        let value = message.to_json_value().map_err(|e| {
            HeraldError::Serialization(format!("{} encode failed: {e}", message.type_name()))
        })?;
        Ok(value.to_string())
    }

    fn deserialize(&self, data: &str, entry: &CatalogEntry) -> Result<AnyMessage> {
        let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
            HeraldError::Serialization(format!(
                "{} decode failed: {e}",
                entry.descriptor().name()
            ))
        })?;
        entry.decode(value)
    }
}
