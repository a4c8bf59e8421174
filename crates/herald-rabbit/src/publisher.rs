//! RabbitMQ publisher bus.
//!
//! Every publish opens its own connection+channel through the `BrokerLink`
//! and closes it afterwards, whatever the outcome. No pooling: a wedged
//! channel can only ever block the publish that opened it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;

use herald_core::envelope::Envelope;
use herald_core::error::{HeraldError, Result};
use herald_core::message::AnyMessage;
use herald_core::serializer::{JsonSerializer, Serializer};
use herald_dispatch::bus::{Bus, PublishContext};

use crate::broker::{AmqpLink, BrokerChannel, BrokerLink, OutboundMessage};
use crate::config::{MessageContent, RabbitNetworkInfos, RabbitPublisherConfiguration};
use crate::{properties, topology};

pub struct RabbitPublisher {
    config: Arc<RabbitPublisherConfiguration>,
    link: Arc<dyn BrokerLink>,
    serializer: Arc<dyn Serializer>,
}

impl RabbitPublisher {
    pub fn new(config: RabbitPublisherConfiguration, link: Arc<dyn BrokerLink>) -> Self {
        Self {
            config: Arc::new(config),
            link,
            serializer: Arc::new(JsonSerializer),
        }
    }

    /// Publish to the broker named by `config.connection`.
    pub fn connect(config: RabbitPublisherConfiguration) -> Result<Self> {
        let link = AmqpLink::new(&config.connection)?;
        Ok(Self::new(config, Arc::new(link)))
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn configuration(&self) -> &RabbitPublisherConfiguration {
        &self.config
    }

    fn serializer_for(&self, ctx: &PublishContext) -> Arc<dyn Serializer> {
        ctx.serializer
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.serializer))
    }

    fn event_messages(&self, envelope: &Envelope, event: &AnyMessage) -> Result<Vec<OutboundMessage>> {
        let body = envelope.to_bytes()?;
        let props = properties::for_envelope(envelope);
        let routing_key = self.config.routing_key_factory.event_routing_key(event);

        Ok(self
            .config
            .network
            .exchanges_for(MessageContent::Event)
            .map(|ex| OutboundMessage {
                exchange: ex.name.clone(),
                routing_key: routing_key.clone(),
                body: body.clone(),
                properties: props.clone(),
            })
            .collect())
    }

    /// Publish on a scoped channel, closed unconditionally afterwards.
    async fn send(&self, messages: Vec<OutboundMessage>) -> Result<()> {
        let channel = self.link.open().await?;
        let result = transmit(channel.as_ref(), &self.config.network, messages).await;
        if let Err(e) = channel.close().await {
            tracing::debug!(error = %e, "publisher channel close failed");
        }
        result
    }

    async fn publish_group(&self, type_name: &'static str, events: Vec<AnyMessage>, ctx: &PublishContext) -> Result<()> {
        if !self.config.is_parallel(type_name) {
            // arrival order, one publish each; the first failure ends the group
            for event in &events {
                self.publish_event(event, ctx).await?;
            }
            return Ok(());
        }

        let serializer = self.serializer_for(ctx);
        let tasks = events.into_iter().map(|event| {
            let config = Arc::clone(&self.config);
            let serializer = Arc::clone(&serializer);
            tokio::task::spawn_blocking(move || {
                build_envelope(&config, serializer.as_ref(), &event).map(|env| (env, event))
            })
        });

        let mut outbound = Vec::new();
        for built in join_all(tasks).await {
            let (envelope, event) = built
                .map_err(|e| HeraldError::Internal(format!("envelope task failed: {e}")))??;
            outbound.extend(self.event_messages(&envelope, &event)?);
        }
        if outbound.is_empty() {
            return Ok(());
        }
        tracing::debug!(event_type = type_name, messages = outbound.len(), "publishing parallel batch");
        self.send(outbound).await
    }
}

async fn transmit(channel: &dyn BrokerChannel, network: &RabbitNetworkInfos, mut messages: Vec<OutboundMessage>) -> Result<()> {
    topology::declare_exchanges(channel, network).await?;
    if messages.len() > 1 {
        return channel.publish_batch(messages).await;
    }
    match messages.pop() {
        Some(m) => channel.publish(m).await,
        None => Ok(()),
    }
}

fn build_envelope(
    config: &RabbitPublisherConfiguration,
    serializer: &dyn Serializer,
    message: &AnyMessage,
) -> Result<Envelope> {
    let data = serializer.serialize(message)?;
    let envelope = Envelope::new(
        data,
        message.type_name(),
        &config.service_id,
        config.persistent_messages,
    );
    Ok(match config.lifetime_of(message.type_name()) {
        Some(lifetime) => envelope.with_expiration(lifetime),
        None => envelope,
    })
}

/// Group by concrete type, keeping first-seen group order and arrival order
/// inside each group.
fn group_by_type(events: &[AnyMessage]) -> Vec<(&'static str, Vec<AnyMessage>)> {
    let mut groups: Vec<(&'static str, Vec<AnyMessage>)> = Vec::new();
    for e in events {
        match groups.iter_mut().find(|(name, _)| *name == e.type_name()) {
            Some((_, group)) => group.push(e.clone()),
            None => groups.push((e.type_name(), vec![e.clone()])),
        }
    }
    groups
}

#[async_trait]
impl Bus for RabbitPublisher {
    async fn publish_event(&self, event: &AnyMessage, ctx: &PublishContext) -> Result<()> {
        let envelope = build_envelope(&self.config, self.serializer_for(ctx).as_ref(), event)?;
        let messages = self.event_messages(&envelope, event)?;
        if messages.is_empty() {
            tracing::warn!(event_type = %event.type_name(), "no exchange carries events, nothing published");
            return Ok(());
        }
        self.send(messages).await
    }

    /// Type groups run concurrently; a failed group never aborts the others.
    async fn publish_event_range(&self, events: &[AnyMessage], ctx: &PublishContext) -> Result<()> {
        let groups = group_by_type(events);
        let total = groups.len();

        let outcomes = join_all(groups.into_iter().map(|(type_name, group)| async move {
            let res = AssertUnwindSafe(self.publish_group(type_name, group, ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(HeraldError::Internal("type group publish panicked".into())));
            if let Err(e) = &res {
                tracing::error!(event_type = type_name, error = %e, detail = ?e, "batch publish failed for type group");
            }
            res.is_ok()
        }))
        .await;

        let failed = outcomes.iter().filter(|ok| !**ok).count();
        if failed == 0 {
            Ok(())
        } else {
            Err(HeraldError::Transport(format!(
                "{failed} of {total} type groups failed to publish"
            )))
        }
    }

    async fn dispatch_command(&self, command: &AnyMessage, ctx: &PublishContext) -> Result<()> {
        let envelope = build_envelope(&self.config, self.serializer_for(ctx).as_ref(), command)?;
        let exchange = self
            .config
            .network
            .exchanges_for(MessageContent::Command)
            .next()
            .map(|ex| ex.name.clone())
            .unwrap_or_default();

        let message = OutboundMessage {
            exchange,
            routing_key: self.config.routing_key_factory.command_routing_key(command),
            body: envelope.to_bytes()?,
            properties: properties::for_envelope(&envelope),
        };
        self.send(vec![message]).await
    }
}
