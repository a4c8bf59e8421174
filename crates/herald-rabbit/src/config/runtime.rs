use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use herald_core::error::{HeraldError, Result};
use herald_core::message::{AnyMessage, Payload};
use herald_dispatch::DispatcherSettings;

use super::schema::{AckStrategy, RabbitConnectionInfos, RabbitFileConfig, RabbitNetworkInfos, SubscriberSection};
use crate::routing_key::{DefaultRoutingKeyFactory, RoutingKeyFactory};

/// Custom hook run on every received message before in-memory dispatch.
pub type ReceiveCallback = Arc<dyn Fn(AnyMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

fn require_service_id(service_id: &str) -> Result<()> {
    if service_id.trim().is_empty() {
        return Err(HeraldError::Config("service_id must not be empty".into()));
    }
    Ok(())
}

fn boxed_callback<F, Fut>(f: F) -> ReceiveCallback
where
    F: Fn(AnyMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |m: AnyMessage| f(m).boxed())
}

pub struct RabbitPublisherConfiguration {
    pub service_id: String,
    pub connection: RabbitConnectionInfos,
    pub network: RabbitNetworkInfos,
    pub routing_key_factory: Arc<dyn RoutingKeyFactory>,
    /// Type name -> envelope expiration.
    pub lifetimes: HashMap<String, Duration>,
    /// Type names whose batch envelopes are built concurrently.
    pub parallel_types: HashSet<String>,
    pub persistent_messages: bool,
}

impl RabbitPublisherConfiguration {
    pub fn new(
        service_id: impl Into<String>,
        connection: RabbitConnectionInfos,
        network: RabbitNetworkInfos,
    ) -> Result<Self> {
        let service_id = service_id.into();
        require_service_id(&service_id)?;
        connection.validate()?;
        network.validate()?;
        Ok(Self {
            service_id,
            connection,
            network,
            routing_key_factory: Arc::new(DefaultRoutingKeyFactory),
            lifetimes: HashMap::new(),
            parallel_types: HashSet::new(),
            persistent_messages: true,
        })
    }

    /// Publish under the dispatcher's `service_id`.
    pub fn for_dispatcher(
        settings: &DispatcherSettings,
        connection: RabbitConnectionInfos,
        network: RabbitNetworkInfos,
    ) -> Result<Self> {
        Self::new(settings.service_id.clone(), connection, network)
    }

    pub fn with_routing_key_factory(mut self, factory: Arc<dyn RoutingKeyFactory>) -> Self {
        self.routing_key_factory = factory;
        self
    }

    pub fn with_lifetime<P: Payload>(self, lifetime: Duration) -> Self {
        self.with_lifetime_for(P::descriptor().name(), lifetime)
    }

    pub fn with_lifetime_for(mut self, type_name: impl Into<String>, lifetime: Duration) -> Self {
        self.lifetimes.insert(type_name.into(), lifetime);
        self
    }

    /// Build this type's envelopes concurrently inside a batch. Intra-type
    /// order is then no longer guaranteed.
    pub fn with_parallel_dispatch<P: Payload>(mut self) -> Self {
        self.parallel_types.insert(P::descriptor().name().to_string());
        self
    }

    pub fn with_persistent_messages(mut self, persistent: bool) -> Self {
        self.persistent_messages = persistent;
        self
    }

    /// Positive lifetime configured for a type.
    pub fn lifetime_of(&self, type_name: &str) -> Option<Duration> {
        self.lifetimes
            .get(type_name)
            .copied()
            .filter(|d| !d.is_zero())
    }

    pub fn is_parallel(&self, type_name: &str) -> bool {
        self.parallel_types.contains(type_name)
    }
}

impl fmt::Debug for RabbitPublisherConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RabbitPublisherConfiguration")
            .field("service_id", &self.service_id)
            .field("connection", &self.connection.host)
            .field("network", &self.network)
            .field("lifetimes", &self.lifetimes)
            .field("parallel_types", &self.parallel_types)
            .field("persistent_messages", &self.persistent_messages)
            .finish()
    }
}

pub struct RabbitSubscriberConfiguration {
    pub service_id: String,
    pub connection: RabbitConnectionInfos,
    pub network: RabbitNetworkInfos,
    pub ack_strategy: AckStrategy,
    pub dispatch_in_memory: bool,
    pub event_callback: Option<ReceiveCallback>,
    pub command_callback: Option<ReceiveCallback>,
    pub workers: usize,
    pub prefetch: u16,
}

impl RabbitSubscriberConfiguration {
    pub fn new(
        service_id: impl Into<String>,
        connection: RabbitConnectionInfos,
        network: RabbitNetworkInfos,
    ) -> Result<Self> {
        let service_id = service_id.into();
        require_service_id(&service_id)?;
        connection.validate()?;
        network.validate()?;
        let defaults = SubscriberSection::default();
        Ok(Self {
            service_id,
            connection,
            network,
            ack_strategy: defaults.ack_strategy,
            dispatch_in_memory: defaults.dispatch_in_memory,
            event_callback: None,
            command_callback: None,
            workers: defaults.workers,
            prefetch: defaults.prefetch,
        })
    }

    /// Consume as the dispatcher's `service_id`, so messages it published
    /// are recognised as its own.
    pub fn for_dispatcher(
        settings: &DispatcherSettings,
        connection: RabbitConnectionInfos,
        network: RabbitNetworkInfos,
    ) -> Result<Self> {
        Self::new(settings.service_id.clone(), connection, network)
    }

    pub fn with_ack_strategy(mut self, strategy: AckStrategy) -> Self {
        self.ack_strategy = strategy;
        self
    }

    pub fn with_dispatch_in_memory(mut self, enabled: bool) -> Self {
        self.dispatch_in_memory = enabled;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn on_event<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AnyMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.event_callback = Some(boxed_callback(f));
        self
    }

    pub fn on_command<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AnyMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.command_callback = Some(boxed_callback(f));
        self
    }
}

impl fmt::Debug for RabbitSubscriberConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RabbitSubscriberConfiguration")
            .field("service_id", &self.service_id)
            .field("connection", &self.connection.host)
            .field("network", &self.network)
            .field("ack_strategy", &self.ack_strategy)
            .field("dispatch_in_memory", &self.dispatch_in_memory)
            .field("event_callback", &self.event_callback.is_some())
            .field("command_callback", &self.command_callback.is_some())
            .field("workers", &self.workers)
            .field("prefetch", &self.prefetch)
            .finish()
    }
}

impl RabbitFileConfig {
    pub fn publisher_configuration(&self) -> Result<RabbitPublisherConfiguration> {
        let mut cfg = RabbitPublisherConfiguration::new(
            self.service_id.clone(),
            self.connection.clone(),
            self.network.clone(),
        )?
        .with_persistent_messages(self.publisher.persistent_messages);

        for (type_name, ms) in &self.publisher.lifetimes_ms {
            cfg = cfg.with_lifetime_for(type_name.clone(), Duration::from_millis(*ms));
        }
        cfg.parallel_types
            .extend(self.publisher.parallel_types.iter().cloned());
        Ok(cfg)
    }

    pub fn subscriber_configuration(&self) -> Result<RabbitSubscriberConfiguration> {
        Ok(RabbitSubscriberConfiguration::new(
            self.service_id.clone(),
            self.connection.clone(),
            self.network.clone(),
        )?
        .with_ack_strategy(self.subscriber.ack_strategy)
        .with_dispatch_in_memory(self.subscriber.dispatch_in_memory)
        .with_workers(self.subscriber.workers)
        .with_prefetch(self.subscriber.prefetch))
    }
}
