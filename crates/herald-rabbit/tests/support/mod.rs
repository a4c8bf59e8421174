//! In-process broker double implementing the broker seam.
//!
//! Routing follows AMQP rules closely enough for the transport tests:
//! fanout/direct/topic exchanges, the default exchange routing by queue name,
//! per-queue dead-lettering on reject-without-requeue.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use herald_core::error::{HeraldError, Result};
use herald_rabbit::broker::DeliveryStream;
use herald_rabbit::config::{ExchangeInfos, ExchangeKind, QueueInfos};
use herald_rabbit::{BrokerChannel, BrokerLink, DeliveryAcker, InboundDelivery, MessageProperties, OutboundMessage};

#[derive(Debug, Clone)]
pub struct Stored {
    pub exchange: String,
    pub routing_key: String,
    pub body: Bytes,
    pub properties: MessageProperties,
}

type ConsumerTx = mpsc::UnboundedSender<Result<InboundDelivery>>;

#[derive(Default)]
struct FakeQueue {
    dead_letter_exchange: Option<String>,
    backlog: VecDeque<Stored>,
    consumer: Option<(String, ConsumerTx)>,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, (ExchangeKind, Vec<(String, String)>)>,
    queues: HashMap<String, FakeQueue>,
    published: Vec<Stored>,
    acked: Vec<(String, Bytes)>,
    rejected: Vec<(String, Bytes)>,
    failing_types: HashSet<String>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeBroker {
    shared: Arc<Shared>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self) -> Arc<dyn BrokerLink> {
        Arc::new(self.clone())
    }

    /// Publishing a message whose AMQP `type` is `type_name` fails.
    pub fn fail_publishes_of(&self, type_name: &str) {
        self.state().failing_types.insert(type_name.to_string());
    }

    pub fn published(&self) -> Vec<Stored> {
        self.state().published.clone()
    }

    /// Messages sitting in a queue without a consumer.
    pub fn queued(&self, queue: &str) -> Vec<Stored> {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.backlog.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn acked(&self) -> Vec<(String, Bytes)> {
        self.state().acked.clone()
    }

    pub fn rejected(&self) -> Vec<(String, Bytes)> {
        self.state().rejected.clone()
    }

    pub fn channels_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn channels_closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Route raw bytes as if another process had published them.
    pub fn inject(&self, exchange: &str, routing_key: &str, body: impl Into<Bytes>) {
        let stored = Stored {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.into(),
            properties: MessageProperties {
                content_type: "text/json".into(),
                persistent: false,
                kind: String::new(),
                expiration: String::new(),
            },
        };
        self.shared.route(stored).unwrap();
    }

    /// Poll until `cond` holds or `limit` elapses.
    pub async fn wait_until(&self, limit: Duration, cond: impl Fn(&FakeBroker) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if cond(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.shared.state.lock().unwrap()
    }
}

impl Shared {
    fn route(self: &Arc<Self>, msg: Stored) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let targets: Vec<String> = if msg.exchange.is_empty() {
            vec![msg.routing_key.clone()]
        } else {
            let Some((kind, bindings)) = state.exchanges.get(&msg.exchange) else {
                return Err(HeraldError::Transport(format!("NOT_FOUND - no exchange '{}'", msg.exchange)));
            };
            bindings
                .iter()
                .filter(|(_, key)| match kind {
                    ExchangeKind::Fanout => true,
                    ExchangeKind::Direct => *key == msg.routing_key,
                    ExchangeKind::Topic => topic_matches(key, &msg.routing_key),
                })
                .map(|(q, _)| q.clone())
                .collect()
        };

        for q in targets {
            let Some(queue) = state.queues.get_mut(&q) else {
                continue;
            };
            let undelivered = match &queue.consumer {
                Some((_, tx)) => {
                    let delivery = InboundDelivery {
                        body: msg.body.clone(),
                        acker: Box::new(FakeAcker {
                            shared: Arc::clone(self),
                            queue: q.clone(),
                            message: msg.clone(),
                            settled: AtomicBool::new(false),
                        }),
                    };
                    tx.send(Ok(delivery)).is_err()
                }
                None => true,
            };
            if undelivered {
                queue.backlog.push_back(msg.clone());
            }
        }
        Ok(())
    }
}

fn topic_matches(pattern: &str, key: &str) -> bool {
    fn go(p: &[&str], k: &[&str]) -> bool {
        match (p.first(), k.first()) {
            (None, None) => true,
            (Some(&"#"), _) => go(&p[1..], k) || (!k.is_empty() && go(p, &k[1..])),
            (Some(&"*"), Some(_)) => go(&p[1..], &k[1..]),
            (Some(a), Some(b)) if a == b => go(&p[1..], &k[1..]),
            _ => false,
        }
    }
    let p: Vec<&str> = pattern.split('.').collect();
    let k: Vec<&str> = key.split('.').collect();
    go(&p, &k)
}

struct FakeAcker {
    shared: Arc<Shared>,
    queue: String,
    message: Stored,
    settled: AtomicBool,
}

#[async_trait]
impl DeliveryAcker for FakeAcker {
    async fn ack(&self) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(HeraldError::Transport("PRECONDITION_FAILED - unknown delivery tag".into()));
        }
        let mut state = self.shared.state.lock().unwrap();
        state.acked.push((self.queue.clone(), self.message.body.clone()));
        Ok(())
    }

    async fn reject(&self) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(HeraldError::Transport("PRECONDITION_FAILED - unknown delivery tag".into()));
        }
        let dlx = {
            let mut state = self.shared.state.lock().unwrap();
            state.rejected.push((self.queue.clone(), self.message.body.clone()));
            state
                .queues
                .get(&self.queue)
                .and_then(|q| q.dead_letter_exchange.clone())
        };
        if let Some(dlx) = dlx {
            let mut dead = self.message.clone();
            dead.exchange = dlx;
            self.shared.route(dead)?;
        }
        Ok(())
    }
}

struct FakeChannel {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

#[async_trait]
impl BrokerLink for FakeBroker {
    async fn open(&self) -> Result<Box<dyn BrokerChannel>> {
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeChannel {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    async fn declare_exchange(&self, exchange: &ExchangeInfos) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        state
            .exchanges
            .entry(exchange.name.clone())
            .or_insert_with(|| (exchange.kind, Vec::new()));
        Ok(())
    }

    async fn declare_queue(&self, queue: &QueueInfos, dead_letter_exchange: Option<&str>) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        let q = state.queues.entry(queue.name.clone()).or_default();
        q.dead_letter_exchange = dead_letter_exchange.map(str::to_string);
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        let Some((_, bindings)) = state.exchanges.get_mut(exchange) else {
            return Err(HeraldError::Transport(format!("NOT_FOUND - no exchange '{exchange}'")));
        };
        let binding = (queue.to_string(), routing_key.to_string());
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HeraldError::Transport("channel closed".into()));
        }
        let stored = Stored {
            exchange: message.exchange,
            routing_key: message.routing_key,
            body: message.body,
            properties: message.properties,
        };
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.failing_types.contains(&stored.properties.kind) {
                return Err(HeraldError::Transport(format!(
                    "publish of {} refused",
                    stored.properties.kind
                )));
            }
            state.published.push(stored.clone());
        }
        self.shared.route(stored)
    }

    async fn set_prefetch(&self, _count: u16) -> Result<()> {
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog: Vec<Stored> = {
            let mut state = self.shared.state.lock().unwrap();
            let Some(q) = state.queues.get_mut(queue) else {
                return Err(HeraldError::Transport(format!("NOT_FOUND - no queue '{queue}'")));
            };
            q.consumer = Some((consumer_tag.to_string(), tx.clone()));
            q.backlog.drain(..).collect()
        };
        for msg in backlog {
            let delivery = InboundDelivery {
                body: msg.body.clone(),
                acker: Box::new(FakeAcker {
                    shared: Arc::clone(&self.shared),
                    queue: queue.to_string(),
                    message: msg,
                    settled: AtomicBool::new(false),
                }),
            };
            let _ = tx.send(Ok(delivery));
        }

        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        for q in state.queues.values_mut() {
            if q.consumer.as_ref().is_some_and(|(tag, _)| tag == consumer_tag) {
                q.consumer = None;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
