//! In-process broker with topic-exchange routing, for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{
    Delivery, Disposition, QueueBinding, Subscription, Transport, TransportConnector,
    TransportMessage,
};

/// A message as handed to `publish`
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
}

struct Queue {
    tx: mpsc::UnboundedSender<TransportMessage>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportMessage>>>,
}

struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
}

#[derive(Default)]
struct BrokerState {
    exchanges: DashSet<String>,
    queues: DashMap<String, Queue>,
    bindings: Mutex<Vec<Binding>>,
    published: Mutex<Vec<PublishedMessage>>,
    settlements: Mutex<Vec<(u64, Disposition)>>,
    sequence: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared broker state; survives individual connections
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection handle
    pub fn connect(&self) -> Arc<InMemoryTransport> {
        Arc::new(InMemoryTransport {
            broker: self.clone(),
            connected: Arc::new(AtomicBool::new(true)),
            fail_publish: AtomicBool::new(false),
        })
    }

    /// Everything successfully handed to `publish`, in order
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state.published).clone()
    }

    /// (delivery tag, disposition) pairs in settlement order
    pub fn settlements(&self) -> Vec<(u64, Disposition)> {
        lock(&self.state.settlements).clone()
    }

    pub fn is_exchange_declared(&self, exchange: &str) -> bool {
        self.state.exchanges.contains(exchange)
    }

    /// Route a message as if some other client published it
    pub fn inject(&self, exchange: &str, routing_key: &str, payload: Bytes) -> Result<usize, TransportError> {
        self.route(exchange, routing_key, payload, HashMap::new())
    }

    fn declare_queue(&self, name: &str) {
        self.state.queues.entry(name.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            Queue {
                tx,
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            }
        });
    }

    /// Deliver to every matching queue; returns how many received it
    fn route(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<usize, TransportError> {
        let targets: Vec<String> = if exchange.is_empty() {
            vec![routing_key.to_string()]
        } else {
            if !self.state.exchanges.contains(exchange) {
                return Err(TransportError::PublishFailed(format!(
                    "no exchange '{}'",
                    exchange
                )));
            }
            lock(&self.state.bindings)
                .iter()
                .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, routing_key))
                .map(|b| b.queue.clone())
                .collect()
        };

        let mut delivered = 0;
        for name in targets {
            if let Some(queue) = self.state.queues.get(&name) {
                let msg = TransportMessage {
                    subject: routing_key.to_string(),
                    payload: payload.clone(),
                    headers: headers.clone(),
                    delivery_tag: self.state.sequence.fetch_add(1, Ordering::Relaxed) + 1,
                };
                if queue.tx.send(msg).is_ok() {
                    delivered += 1;
                }
            }
        }
        Ok(delivered)
    }
}

/// One connection to an `InMemoryBroker`
pub struct InMemoryTransport {
    broker: InMemoryBroker,
    connected: Arc<AtomicBool>,
    fail_publish: AtomicBool,
}

impl InMemoryTransport {
    /// Connection to a private broker
    pub fn new() -> Arc<Self> {
        InMemoryBroker::new().connect()
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Simulate the broker dropping this connection
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Make subsequent publishes fail while staying connected
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    fn check_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

struct InMemoryDelivery {
    message: TransportMessage,
    requeue: mpsc::UnboundedSender<TransportMessage>,
    connected: Arc<AtomicBool>,
    broker: InMemoryBroker,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn message(&self) -> &TransportMessage {
        &self.message
    }

    async fn settle(self: Box<Self>, disposition: Disposition) -> Result<(), TransportError> {
        let this = *self;
        if !this.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        lock(&this.broker.state.settlements).push((this.message.delivery_tag, disposition));
        if disposition == Disposition::Nak {
            let _ = this.requeue.send(this.message);
        }
        Ok(())
    }
}

struct InMemorySubscription {
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportMessage>>>,
    requeue: mpsc::UnboundedSender<TransportMessage>,
    connected: Arc<AtomicBool>,
    broker: InMemoryBroker,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Box<dyn Delivery>>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => {
                if self.connected.load(Ordering::SeqCst) {
                    Ok(None)
                } else {
                    Err(TransportError::Closed)
                }
            }
            Ok(None) => Err(TransportError::Closed),
            Ok(Some(message)) => Ok(Some(Box::new(InMemoryDelivery {
                message,
                requeue: self.requeue.clone(),
                connected: Arc::clone(&self.connected),
                broker: self.broker.clone(),
            }))),
        }
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        self.check_connected()?;
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed("injected failure".to_string()));
        }

        self.broker
            .route(exchange, routing_key, payload.clone(), headers.clone())?;
        lock(&self.broker.state.published).push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
            headers,
        });
        Ok(())
    }

    async fn declare_exchange(&self, exchange: &str) -> Result<(), TransportError> {
        self.check_connected()?;
        self.broker.state.exchanges.insert(exchange.to_string());
        Ok(())
    }

    async fn consume(&self, binding: &QueueBinding) -> Result<Box<dyn Subscription>, TransportError> {
        self.check_connected()?;
        if !binding.exchange.is_empty() && !self.broker.is_exchange_declared(&binding.exchange) {
            return Err(TransportError::SubscribeFailed(format!(
                "no exchange '{}'",
                binding.exchange
            )));
        }

        self.broker.declare_queue(&binding.queue);
        if !binding.exchange.is_empty() {
            let mut bindings = lock(&self.broker.state.bindings);
            let exists = bindings.iter().any(|b| {
                b.exchange == binding.exchange
                    && b.pattern == binding.binding_key
                    && b.queue == binding.queue
            });
            if !exists {
                bindings.push(Binding {
                    exchange: binding.exchange.clone(),
                    pattern: binding.binding_key.clone(),
                    queue: binding.queue.clone(),
                });
            }
        }

        let queue = self
            .broker
            .state
            .queues
            .get(&binding.queue)
            .ok_or_else(|| TransportError::SubscribeFailed(binding.queue.clone()))?;
        Ok(Box::new(InMemorySubscription {
            rx: Arc::clone(&queue.rx),
            requeue: queue.tx.clone(),
            connected: Arc::clone(&self.connected),
            broker: self.broker.clone(),
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out connections to one broker; can refuse the first N attempts
pub struct InMemoryConnector {
    broker: InMemoryBroker,
    refuse_first: u32,
    attempts: AtomicU32,
    last: Mutex<Option<Arc<InMemoryTransport>>>,
}

impl InMemoryConnector {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self::refusing(broker, 0)
    }

    pub fn refusing(broker: InMemoryBroker, refuse_first: u32) -> Self {
        Self {
            broker,
            refuse_first,
            attempts: AtomicU32::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Most recently opened connection
    pub fn last_connection(&self) -> Option<Arc<InMemoryTransport>> {
        lock(&self.last).clone()
    }
}

#[async_trait]
impl TransportConnector for InMemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.refuse_first {
            return Err(TransportError::ConnectionFailed("connection refused".to_string()));
        }
        let conn = self.broker.connect();
        *lock(&self.last) = Some(Arc::clone(&conn));
        Ok(conn)
    }

    fn target(&self) -> String {
        "memory".to_string()
    }
}

/// AMQP topic match: `*` is exactly one word, `#` zero or more
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            match_words(&pattern[1..], key) || (!key.is_empty() && match_words(pattern, &key[1..]))
        }
        (Some(_), None) | (None, Some(_)) => false,
        (Some(&"*"), Some(_)) => match_words(&pattern[1..], &key[1..]),
        (Some(p), Some(k)) => p == k && match_words(&pattern[1..], &key[1..]),
    }
}
