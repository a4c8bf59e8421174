//! `lapin` implementation of the broker seam.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use futures_util::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind as AmqpExchangeKind};

use herald_core::error::{HeraldError, Result};

use super::{BrokerChannel, BrokerLink, DeliveryAcker, DeliveryStream, InboundDelivery, OutboundMessage};
use crate::config::{ExchangeInfos, ExchangeKind, QueueInfos, RabbitConnectionInfos};

fn transport(e: lapin::Error) -> HeraldError {
    HeraldError::Transport(e.to_string())
}

/// Only a broker ack counts as delivered.
fn confirmed(confirmation: Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(HeraldError::Transport("publish nacked by broker".into())),
        Confirmation::NotRequested => Err(HeraldError::Transport(
            "publish not confirmed: channel is not in confirm mode".into(),
        )),
    }
}

/// Opens a fresh AMQP connection and a confirm-mode channel per `open`.
#[derive(Debug, Clone)]
pub struct AmqpLink {
    uri: String,
}

impl AmqpLink {
    pub fn new(connection: &RabbitConnectionInfos) -> Result<Self> {
        Ok(Self {
            uri: connection.amqp_uri()?,
        })
    }

    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[async_trait]
impl BrokerLink for AmqpLink {
    async fn open(&self) -> Result<Box<dyn BrokerChannel>> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(transport)?;
        let opened = match connection.create_channel().await {
            Ok(c) => c
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map(|()| c),
            Err(e) => Err(e),
        };
        let channel = match opened {
            Ok(c) => c,
            Err(e) => {
                let _ = connection.close(200, "channel open failed").await;
                return Err(transport(e));
            }
        };
        Ok(Box::new(AmqpChannel { connection, channel }))
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

fn exchange_kind(kind: ExchangeKind) -> AmqpExchangeKind {
    match kind {
        ExchangeKind::Fanout => AmqpExchangeKind::Fanout,
        ExchangeKind::Topic => AmqpExchangeKind::Topic,
        ExchangeKind::Direct => AmqpExchangeKind::Direct,
    }
}

fn basic_properties(m: &OutboundMessage) -> BasicProperties {
    BasicProperties::default()
        .with_content_type(ShortString::from(m.properties.content_type.clone()))
        .with_delivery_mode(m.properties.delivery_mode())
        .with_kind(ShortString::from(m.properties.kind.clone()))
        .with_expiration(ShortString::from(m.properties.expiration.clone()))
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, exchange: &ExchangeInfos) -> Result<()> {
        let opts = ExchangeDeclareOptions {
            durable: exchange.durable,
            auto_delete: exchange.auto_delete,
            ..ExchangeDeclareOptions::default()
        };
        self.channel
            .exchange_declare(&exchange.name, exchange_kind(exchange.kind), opts, FieldTable::default())
            .await
            .map_err(transport)
    }

    async fn declare_queue(&self, queue: &QueueInfos, dead_letter_exchange: Option<&str>) -> Result<()> {
        let opts = QueueDeclareOptions {
            durable: queue.durable,
            exclusive: queue.exclusive,
            auto_delete: queue.auto_delete,
            ..QueueDeclareOptions::default()
        };
        let mut args = FieldTable::default();
        if let Some(dlx) = dead_letter_exchange {
            args.insert(
                ShortString::from("x-dead-letter-exchange"),
                AMQPValue::LongString(LongString::from(dlx.to_string())),
            );
        }
        self.channel
            .queue_declare(&queue.name, opts, args)
            .await
            .map(|_| ())
            .map_err(transport)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_bind(queue, exchange, routing_key, QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(transport)
    }

    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let confirm = self
            .channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                basic_properties(&message),
            )
            .await
            .map_err(transport)?;
        confirmed(confirm.await.map_err(transport)?)
    }

    /// Sends every frame first, then waits for the confirms together.
    async fn publish_batch(&self, messages: Vec<OutboundMessage>) -> Result<()> {
        let mut confirms = Vec::with_capacity(messages.len());
        for m in &messages {
            let confirm = self
                .channel
                .basic_publish(
                    &m.exchange,
                    &m.routing_key,
                    BasicPublishOptions::default(),
                    &m.body,
                    basic_properties(m),
                )
                .await
                .map_err(transport)?;
            confirms.push(confirm);
        }
        let mut nacked = 0usize;
        for res in join_all(confirms).await {
            if confirmed(res.map_err(transport)?).is_err() {
                nacked += 1;
            }
        }
        if nacked == 0 {
            Ok(())
        } else {
            Err(HeraldError::Transport(format!(
                "{nacked} of {} publishes not confirmed by broker",
                messages.len()
            )))
        }
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(transport)
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
            .await
            .map_err(transport)?;

        Ok(consumer
            .map(|res| {
                res.map(|d| InboundDelivery {
                    body: Bytes::from(d.data),
                    acker: Box::new(AmqpAcker(d.acker)),
                })
                .map_err(transport)
            })
            .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(transport)
    }

    async fn close(&self) -> Result<()> {
        let channel = self.channel.close(200, "bye").await.map_err(transport);
        let connection = self.connection.close(200, "bye").await.map_err(transport);
        channel.and(connection)
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl DeliveryAcker for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(transport)
    }

    async fn reject(&self) -> Result<()> {
        self.0
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map(|_| ())
            .map_err(transport)
    }
}
