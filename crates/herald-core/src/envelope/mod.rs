//! Envelope: the wire format shared by every broker transport.
//!
//! Field names and casing are a cross-version contract: publishers and
//! subscribers built at different times serialize this exact shape.
//! Decoding is lenient about missing fields (they default to empty) so a
//! partial envelope can be recognised as undispatchable and dropped instead of
//! failing the consumer.

pub mod timespan;

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{HeraldError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Serialized payload.
    #[serde(rename = "Data", default)]
    pub data: String,
    /// Qualified type name of the payload (type discriminator).
    #[serde(rename = "AssemblyQualifiedDataType", default)]
    pub data_type: String,
    /// Service id of the originating process.
    #[serde(rename = "Emiter", default)]
    pub emiter: String,
    #[serde(rename = "PersistentMessage", default)]
    pub persistent_message: bool,
    #[serde(rename = "Expiration", default, with = "timespan::option")]
    pub expiration: Option<Duration>,
}

impl Envelope {
    pub fn new(
        data: impl Into<String>,
        data_type: impl Into<String>,
        emiter: impl Into<String>,
        persistent_message: bool,
    ) -> Self {
        Self {
            data: data.into(),
            data_type: data_type.into(),
            emiter: emiter.into(),
            persistent_message,
            expiration: None,
        }
    }

    /// Attach an expiration. Zero durations are ignored.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        if !expiration.is_zero() {
            self.expiration = Some(expiration);
        }
        self
    }

    /// Both payload and discriminator are present.
    pub fn is_dispatchable(&self) -> bool {
        !self.data.is_empty() && !self.data_type.is_empty()
    }

    /// Expiration in whole milliseconds, when positive.
    pub fn expiration_ms(&self) -> Option<u64> {
        self.expiration
            .map(|d| d.as_millis() as u64)
            .filter(|ms| *ms > 0)
    }

    /// UTF-8 JSON body for a wire send.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let v = serde_json::to_vec(self)
            .map_err(|e| HeraldError::Serialization(format!("envelope encode failed: {e}")))?;
        Ok(Bytes::from(v))
    }

    /// Decode a wire body.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        if body.is_empty() {
            return Err(HeraldError::InvalidArgument("empty envelope body".into()));
        }
        serde_json::from_slice(body)
            .map_err(|e| HeraldError::Serialization(format!("envelope decode failed: {e}")))
    }
}
