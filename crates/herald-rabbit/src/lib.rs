//! Herald RabbitMQ transport.
//!
//! - `RabbitPublisher`: a `Bus` that wraps every message in an `Envelope` and
//!   publishes it on a fresh connection+channel per call.
//! - `RabbitSubscriber`: declares the topology, consumes the configured
//!   queues and hands decoded messages to callbacks and the in-memory buses,
//!   then acks or rejects according to the `AckStrategy`.
//!
//! The broker itself sits behind `BrokerLink`/`BrokerChannel`; `AmqpLink`
//! is the `lapin` implementation.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod broker;
pub mod config;
pub mod ops;
pub mod properties;
pub mod publisher;
pub mod routing_key;
pub mod subscriber;
pub mod topology;

pub use broker::{AmqpLink, BrokerChannel, BrokerLink, DeliveryAcker, InboundDelivery, MessageProperties, OutboundMessage};
pub use config::{
    AckStrategy, ExchangeInfos, ExchangeKind, QueueBinding, QueueInfos, RabbitConnectionInfos, RabbitNetworkInfos,
    RabbitPublisherConfiguration, RabbitSubscriberConfiguration, MessageContent,
};
pub use publisher::RabbitPublisher;
pub use routing_key::{DefaultRoutingKeyFactory, RoutingKeyFactory};
pub use subscriber::{RabbitSubscriber, SubscriberMetrics};
pub use topology::{CONST_DEAD_LETTER_EXCHANGE_NAME, CONST_DEAD_LETTER_QUEUE_NAME};
