//! Topology declaration: dead-letter pair first, then exchanges, queues and
//! bindings from `RabbitNetworkInfos`. Every step is idempotent on the broker.

use herald_core::error::Result;

use crate::broker::BrokerChannel;
use crate::config::{ExchangeInfos, ExchangeKind, QueueInfos, RabbitNetworkInfos};

/// Shared by every consumer in a process.
pub const CONST_DEAD_LETTER_EXCHANGE_NAME: &str = "herald_dead_letter_exchange";
pub const CONST_DEAD_LETTER_QUEUE_NAME: &str = "herald_dead_letter_queue";

pub fn dead_letter_exchange() -> ExchangeInfos {
    ExchangeInfos::new(CONST_DEAD_LETTER_EXCHANGE_NAME, ExchangeKind::Fanout)
}

pub fn dead_letter_queue() -> QueueInfos {
    QueueInfos::new(CONST_DEAD_LETTER_QUEUE_NAME).bound_to(CONST_DEAD_LETTER_EXCHANGE_NAME, "")
}

/// Exchanges only; what a publisher needs before sending.
pub async fn declare_exchanges(channel: &dyn BrokerChannel, network: &RabbitNetworkInfos) -> Result<()> {
    for ex in &network.exchanges {
        channel.declare_exchange(ex).await?;
    }
    Ok(())
}

/// Full subscriber-side topology.
pub async fn declare(channel: &dyn BrokerChannel, network: &RabbitNetworkInfos) -> Result<()> {
    if network.needs_dead_letter_queue() {
        let dlq = dead_letter_queue();
        channel.declare_exchange(&dead_letter_exchange()).await?;
        channel.declare_queue(&dlq, None).await?;
        channel
            .bind_queue(CONST_DEAD_LETTER_QUEUE_NAME, CONST_DEAD_LETTER_EXCHANGE_NAME, "")
            .await?;
        tracing::debug!(queue = CONST_DEAD_LETTER_QUEUE_NAME, "dead-letter queue declared");
    }

    declare_exchanges(channel, network).await?;

    for q in &network.queues {
        let dlx = q
            .create_and_use_dead_letter_queue
            .then_some(CONST_DEAD_LETTER_EXCHANGE_NAME);
        channel.declare_queue(q, dlx).await?;
        for b in &q.bindings {
            // the default exchange routes by queue name and takes no bindings
            if b.exchange.is_empty() {
                continue;
            }
            channel.bind_queue(&q.name, &b.exchange, &b.routing_key).await?;
        }
        tracing::debug!(queue = %q.name, bindings = q.bindings.len(), dead_letter = dlx.is_some(), "queue declared");
    }
    Ok(())
}
