//! RabbitMQ subscriber.
//!
//! Lifecycle:
//! 1. `start` opens one channel, declares the dead-letter pair (when a queue
//!    asks for it) and the configured topology, then attaches one consumer
//!    per queue.
//! 2. Consumer tasks only forward deliveries into a bounded channel;
//!    `workers` tasks own decoding, dispatch and the ack decision.
//! 3. `stop` cancels consumers, drains the workers and closes the channel.
//!    Cleanup failures are logged and swallowed.

mod metrics;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use herald_core::catalog::TypeCatalog;
use herald_core::envelope::Envelope;
use herald_core::error::Result;
use herald_core::serializer::{JsonSerializer, Serializer};
use herald_dispatch::bus::{InMemoryBus, InMemoryCommandBus, InMemoryEventBus};
use herald_dispatch::Dispatcher;

use crate::broker::{AmqpLink, BrokerChannel, BrokerLink, DeliveryStream, InboundDelivery};
use crate::config::{RabbitNetworkInfos, RabbitSubscriberConfiguration};
use crate::topology;

pub use metrics::SubscriberMetrics;
pub use worker::EnvelopeObserver;

use worker::Processor;

/// Bound on how long `stop` waits for in-flight deliveries.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type Job = (Arc<str>, InboundDelivery);

struct Running {
    channel: Box<dyn BrokerChannel>,
    consumer_tags: Vec<String>,
    consumers: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Running {
    async fn shutdown(self, metrics: &SubscriberMetrics) {
        for tag in &self.consumer_tags {
            if let Err(e) = self.channel.cancel(tag).await {
                tracing::debug!(consumer = %tag, error = %e, "consumer cancel failed");
            }
            metrics.consumers.dec(&[]);
        }
        // dropping the forwarders drops every sender; workers then drain and exit
        for c in &self.consumers {
            c.abort();
        }
        let _ = join_all(self.consumers).await;

        let aborts: Vec<_> = self.workers.iter().map(|w| w.abort_handle()).collect();
        if tokio::time::timeout(DRAIN_TIMEOUT, join_all(self.workers)).await.is_err() {
            tracing::warn!("subscriber workers still busy after drain timeout, aborting");
            for a in aborts {
                a.abort();
            }
        }

        if let Err(e) = self.channel.close().await {
            tracing::debug!(error = %e, "subscriber channel close failed");
        }
    }

    fn abort(&self) {
        for task in self.consumers.iter().chain(self.workers.iter()) {
            task.abort();
        }
    }
}

pub struct RabbitSubscriber {
    network: RabbitNetworkInfos,
    workers: usize,
    prefetch: u16,
    link: Arc<dyn BrokerLink>,
    processor: Processor,
    running: Mutex<Option<Running>>,
    active: AtomicBool,
}

impl RabbitSubscriber {
    pub fn new(config: RabbitSubscriberConfiguration, link: Arc<dyn BrokerLink>, catalog: Arc<TypeCatalog>) -> Self {
        let processor = Processor {
            service_id: config.service_id,
            ack_strategy: config.ack_strategy,
            dispatch_in_memory: config.dispatch_in_memory,
            event_callback: config.event_callback,
            command_callback: config.command_callback,
            catalog,
            serializer: Arc::new(JsonSerializer),
            event_bus: None,
            command_bus: None,
            observer: None,
            metrics: Arc::new(SubscriberMetrics::default()),
        };
        Self {
            network: config.network,
            workers: config.workers.max(1),
            prefetch: config.prefetch.max(1),
            link,
            processor,
            running: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    /// Consume from the broker named by `config.connection`.
    pub fn connect(config: RabbitSubscriberConfiguration, catalog: Arc<TypeCatalog>) -> Result<Self> {
        let link = AmqpLink::new(&config.connection)?;
        Ok(Self::new(config, Arc::new(link), catalog))
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.processor.serializer = serializer;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<dyn InMemoryEventBus>) -> Self {
        self.processor.event_bus = Some(bus);
        self
    }

    pub fn with_command_bus(mut self, bus: Arc<dyn InMemoryCommandBus>) -> Self {
        self.processor.command_bus = Some(bus);
        self
    }

    /// Use one in-memory bus for both events and commands.
    pub fn with_in_memory(self, bus: InMemoryBus) -> Self {
        let bus = Arc::new(bus);
        self.with_event_bus(bus.clone()).with_command_bus(bus)
    }

    /// Deliver to the handlers registered on `dispatcher`.
    pub fn with_dispatcher(self, dispatcher: &Dispatcher) -> Self {
        self.with_in_memory(dispatcher.in_memory_bus())
    }

    pub fn with_envelope_observer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.processor.observer = Some(Arc::new(f));
        self
    }

    pub fn service_id(&self) -> &str {
        &self.processor.service_id
    }

    pub fn metrics(&self) -> Arc<SubscriberMetrics> {
        Arc::clone(&self.processor.metrics)
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Declare the topology and start consuming. Calling it again while
    /// running is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.running.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let channel = self.link.open().await?;
        if let Err(e) = self.prepare(channel.as_ref()).await {
            if let Err(close) = channel.close().await {
                tracing::debug!(error = %close, "subscriber channel close failed");
            }
            return Err(e);
        }

        let (tx, rx) = mpsc::channel::<Job>(usize::from(self.prefetch));
        let rx = Arc::new(Mutex::new(rx));
        let processor = Arc::new(self.processor.clone());

        let workers = (0..self.workers)
            .map(|id| tokio::spawn(work(id, Arc::clone(&rx), Arc::clone(&processor))))
            .collect();

        let mut running = Running {
            channel,
            consumer_tags: Vec::new(),
            consumers: Vec::new(),
            workers,
        };

        for q in &self.network.queues {
            let tag = format!("{}-{}", self.processor.service_id, q.name);
            let stream = match running.channel.consume(&q.name, &tag).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(queue = %q.name, error = %e, "consumer attach failed");
                    drop(tx);
                    running.shutdown(&self.processor.metrics).await;
                    return Err(e);
                }
            };
            self.processor.metrics.consumers.inc(&[]);
            running
                .consumers
                .push(tokio::spawn(forward(Arc::from(q.name.as_str()), stream, tx.clone())));
            running.consumer_tags.push(tag);
        }
        drop(tx);

        if running.consumer_tags.is_empty() {
            tracing::warn!(service_id = %self.processor.service_id, "subscriber has no queue to consume");
        }
        tracing::info!(
            service_id = %self.processor.service_id,
            queues = running.consumer_tags.len(),
            workers = self.workers,
            prefetch = self.prefetch,
            "rabbit subscriber started"
        );

        *slot = Some(running);
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    async fn prepare(&self, channel: &dyn BrokerChannel) -> Result<()> {
        topology::declare(channel, &self.network).await?;
        channel.set_prefetch(self.prefetch).await
    }

    /// Stop consuming and release the channel. Never fails.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        self.active.store(false, Ordering::Release);
        running.shutdown(&self.processor.metrics).await;
        tracing::info!(service_id = %self.processor.service_id, "rabbit subscriber stopped");
    }
}

impl Drop for RabbitSubscriber {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.abort();
        }
    }
}

async fn forward(queue: Arc<str>, mut stream: DeliveryStream, tx: mpsc::Sender<Job>) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(delivery) => {
                if tx.send((Arc::clone(&queue), delivery)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(queue = %queue, error = %e, "consumer stream error");
            }
        }
    }
    tracing::debug!(queue = %queue, "consumer stream ended");
}

async fn work(id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, processor: Arc<Processor>) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some((queue, delivery)) = next else {
            break;
        };
        processor.handle(&queue, delivery).await;
    }
    tracing::debug!(worker = id, "subscriber worker stopped");
}
