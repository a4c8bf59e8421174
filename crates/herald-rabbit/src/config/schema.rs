use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use herald_core::error::{HeraldError, Result};

pub const DEFAULT_AMQP_PORT: u16 = 5672;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RabbitFileConfig {
    pub version: u32,

    pub service_id: String,

    pub connection: RabbitConnectionInfos,

    #[serde(default)]
    pub network: RabbitNetworkInfos,

    #[serde(default)]
    pub publisher: PublisherSection,

    #[serde(default)]
    pub subscriber: SubscriberSection,

    #[serde(default)]
    pub ops: OpsSection,
}

impl RabbitFileConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(HeraldError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        if self.service_id.trim().is_empty() {
            return Err(HeraldError::Config("service_id must not be empty".into()));
        }
        self.connection.validate()?;
        self.network.validate()?;
        self.subscriber.validate()?;
        self.ops.validate()?;
        Ok(())
    }
}

/// Broker endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RabbitConnectionInfos {
    /// `host` or `host:port`.
    pub host: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_user")]
    pub password: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,
}

impl RabbitConnectionInfos {
    /// Build from a `host[:port]` string. Fails fast on a malformed host.
    pub fn from_host_string(host: &str, user: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let infos = Self {
            host: host.trim().to_string(),
            user: user.into(),
            password: password.into(),
            vhost: default_vhost(),
        };
        infos.validate()?;
        Ok(infos)
    }

    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.endpoint().map(|_| ())
    }

    /// Host name and port (default 5672).
    pub fn endpoint(&self) -> Result<(&str, u16)> {
        let bad = |why: &str| HeraldError::Config(format!("invalid rabbit host '{}': {why}", self.host));

        if self.host.is_empty() {
            return Err(bad("empty"));
        }
        if self.host.contains("://") || self.host.contains('/') || self.host.chars().any(char::is_whitespace) {
            return Err(bad("expected host[:port]"));
        }

        match self.host.rsplit_once(':') {
            None => Ok((self.host.as_str(), DEFAULT_AMQP_PORT)),
            Some((name, port)) => {
                if name.is_empty() || name.contains(':') {
                    return Err(bad("expected host[:port]"));
                }
                let port: u16 = port.parse().map_err(|_| bad("port is not a number"))?;
                if port == 0 {
                    return Err(bad("port must be positive"));
                }
                Ok((name, port))
            }
        }
    }

    /// `amqp://` URI with user, password and vhost percent-encoded.
    pub fn amqp_uri(&self) -> Result<String> {
        let (host, port) = self.endpoint()?;
        let vhost = if self.vhost == "/" {
            "%2f".into()
        } else {
            urlencoding::encode(self.vhost.trim_start_matches('/'))
        };
        Ok(format!(
            "amqp://{}:{}@{}:{}/{}",
            urlencoding::encode(&self.user),
            urlencoding::encode(&self.password),
            host,
            port,
            vhost
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Fanout,
    Topic,
    Direct,
}

impl ExchangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Direct => "direct",
        }
    }
}

/// What an exchange carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageContent {
    Event,
    Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeInfos {
    pub name: String,

    #[serde(default = "default_exchange_kind")]
    pub kind: ExchangeKind,

    #[serde(default = "default_true")]
    pub durable: bool,

    #[serde(default)]
    pub auto_delete: bool,

    #[serde(default = "default_content")]
    pub content: Vec<MessageContent>,
}

impl ExchangeInfos {
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
            auto_delete: false,
            content: default_content(),
        }
    }

    pub fn carrying(mut self, content: impl IntoIterator<Item = MessageContent>) -> Self {
        self.content = content.into_iter().collect();
        self
    }

    pub fn carries(&self, content: MessageContent) -> bool {
        self.content.contains(&content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueBinding {
    pub exchange: String,

    #[serde(default)]
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueInfos {
    pub name: String,

    #[serde(default = "default_true")]
    pub durable: bool,

    #[serde(default)]
    pub exclusive: bool,

    #[serde(default)]
    pub auto_delete: bool,

    /// Rejected messages go to the well-known dead-letter queue.
    #[serde(default)]
    pub create_and_use_dead_letter_queue: bool,

    #[serde(default)]
    pub bindings: Vec<QueueBinding>,
}

impl QueueInfos {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
            create_and_use_dead_letter_queue: false,
            bindings: Vec::new(),
        }
    }

    pub fn bound_to(mut self, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.bindings.push(QueueBinding {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        });
        self
    }

    pub fn with_dead_letter_queue(mut self) -> Self {
        self.create_and_use_dead_letter_queue = true;
        self
    }
}

/// Exchanges and queues this process declares and uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RabbitNetworkInfos {
    #[serde(default)]
    pub exchanges: Vec<ExchangeInfos>,

    #[serde(default)]
    pub queues: Vec<QueueInfos>,
}

impl RabbitNetworkInfos {
    pub fn with_exchange(mut self, exchange: ExchangeInfos) -> Self {
        self.exchanges.push(exchange);
        self
    }

    pub fn with_queue(mut self, queue: QueueInfos) -> Self {
        self.queues.push(queue);
        self
    }

    /// Exchanges carrying `content`, in declaration order.
    pub fn exchanges_for(&self, content: MessageContent) -> impl Iterator<Item = &ExchangeInfos> {
        self.exchanges.iter().filter(move |e| e.carries(content))
    }

    pub fn needs_dead_letter_queue(&self) -> bool {
        self.queues.iter().any(|q| q.create_and_use_dead_letter_queue)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for ex in &self.exchanges {
            if ex.name.is_empty() {
                return Err(HeraldError::Config(
                    "network.exchanges: the default exchange cannot be declared".into(),
                ));
            }
            if !names.insert(ex.name.as_str()) {
                return Err(HeraldError::Config(format!(
                    "network.exchanges: duplicate exchange '{}'",
                    ex.name
                )));
            }
            if ex.content.is_empty() {
                return Err(HeraldError::Config(format!(
                    "network.exchanges: '{}' carries nothing",
                    ex.name
                )));
            }
        }

        let mut queues = BTreeSet::new();
        for q in &self.queues {
            if q.name.is_empty() {
                return Err(HeraldError::Config("network.queues: empty queue name".into()));
            }
            if !queues.insert(q.name.as_str()) {
                return Err(HeraldError::Config(format!(
                    "network.queues: duplicate queue '{}'",
                    q.name
                )));
            }
            if q.bindings.is_empty() {
                return Err(HeraldError::Config(format!(
                    "network.queues: '{}' is not bound to any exchange",
                    q.name
                )));
            }
            for b in &q.bindings {
                if !b.exchange.is_empty() && !names.contains(b.exchange.as_str()) {
                    return Err(HeraldError::Config(format!(
                        "network.queues: '{}' binds to undeclared exchange '{}'",
                        q.name, b.exchange
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherSection {
    #[serde(default = "default_true")]
    pub persistent_messages: bool,

    /// Type name -> expiration in milliseconds (0 = none).
    #[serde(default)]
    pub lifetimes_ms: BTreeMap<String, u64>,

    /// Type names whose batch envelopes are built concurrently.
    #[serde(default)]
    pub parallel_types: BTreeSet<String>,
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            persistent_messages: true,
            lifetimes_ms: BTreeMap::new(),
            parallel_types: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStrategy {
    /// Ack only after successful processing; failures are rejected
    /// (dead-lettered when the queue has a DLQ).
    AckOnSuccess,
    /// Ack every delivery regardless of the outcome.
    AckOnReceive,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriberSection {
    #[serde(default = "default_ack_strategy")]
    pub ack_strategy: AckStrategy,

    #[serde(default = "default_true")]
    pub dispatch_in_memory: bool,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
}

impl Default for SubscriberSection {
    fn default() -> Self {
        Self {
            ack_strategy: default_ack_strategy(),
            dispatch_in_memory: true,
            workers: default_workers(),
            prefetch: default_prefetch(),
        }
    }
}

impl SubscriberSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=256).contains(&self.workers) {
            return Err(HeraldError::Config(
                "subscriber.workers must be between 1 and 256".into(),
            ));
        }
        if self.prefetch == 0 {
            return Err(HeraldError::Config("subscriber.prefetch must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpsSection {
    #[serde(default = "default_ops_listen")]
    pub listen: String,
}

impl Default for OpsSection {
    fn default() -> Self {
        Self {
            listen: default_ops_listen(),
        }
    }
}

impl OpsSection {
    pub fn validate(&self) -> Result<()> {
        self.listen
            .parse::<std::net::SocketAddr>()
            .map(|_| ())
            .map_err(|_| HeraldError::Config(format!("ops.listen '{}' is not a socket address", self.listen)))
    }
}

fn default_user() -> String {
    "guest".into()
}
fn default_vhost() -> String {
    "/".into()
}
fn default_true() -> bool {
    true
}
fn default_exchange_kind() -> ExchangeKind {
    ExchangeKind::Fanout
}
fn default_content() -> Vec<MessageContent> {
    vec![MessageContent::Event]
}
fn default_ack_strategy() -> AckStrategy {
    AckStrategy::AckOnSuccess
}
fn default_workers() -> usize {
    4
}
fn default_prefetch() -> u16 {
    32
}
fn default_ops_listen() -> String {
    "127.0.0.1:9464".into()
}
