//! Broker seam.
//!
//! `BrokerLink::open` yields one connection+channel pair as a
//! `BrokerChannel`. The publisher opens and closes one per call; the
//! subscriber keeps one for its whole run. Deliveries carry their own
//! `DeliveryAcker` so workers can settle them without the channel.

mod amqp;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use herald_core::error::Result;

use crate::config::{ExchangeInfos, QueueInfos};

pub use amqp::AmqpLink;

/// AMQP basic properties Herald sets on every publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: String,
    /// Delivery mode 2 when true, 1 otherwise.
    pub persistent: bool,
    /// AMQP `type`: the payload's qualified type name.
    pub kind: String,
    /// Milliseconds, as AMQP expects (a decimal string).
    pub expiration: String,
}

impl MessageProperties {
    pub fn delivery_mode(&self) -> u8 {
        if self.persistent {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Bytes,
    pub properties: MessageProperties,
}

/// Settles one delivery.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<()>;

    /// Reject without requeue (dead-letters when the queue has a DLX).
    async fn reject(&self) -> Result<()>;
}

pub struct InboundDelivery {
    pub body: Bytes,
    pub acker: Box<dyn DeliveryAcker>,
}

impl std::fmt::Debug for InboundDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundDelivery")
            .field("body_len", &self.body.len())
            .finish()
    }
}

pub type DeliveryStream = BoxStream<'static, Result<InboundDelivery>>;

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, exchange: &ExchangeInfos) -> Result<()>;

    /// Declare a queue; `dead_letter_exchange` sets `x-dead-letter-exchange`.
    async fn declare_queue(&self, queue: &QueueInfos, dead_letter_exchange: Option<&str>) -> Result<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    async fn publish(&self, message: OutboundMessage) -> Result<()>;

    /// Publish several messages on this channel, in order.
    async fn publish_batch(&self, messages: Vec<OutboundMessage>) -> Result<()> {
        for m in messages {
            self.publish(m).await?;
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<()>;

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    /// Close the channel and its connection.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait BrokerLink: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrokerChannel>>;
}
