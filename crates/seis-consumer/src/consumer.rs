//! Inbound broker connection and the consume loop
//!
//! Each delivery is handed to a `MessageHandler` and then settled. A
//! successful message is always acknowledged; a failed one is settled
//! according to the configured `FailurePolicy`. Broker-level failures
//! end the loop so the caller can rebuild the connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use seis_middleware::preview::PREVIEW_BYTES;
use seis_middleware::{
    hex_preview, Disposition, QueueBinding, RetryConfig, RetryPolicy, Subscription, Transport,
    TransportConnector, TransportError,
};

use crate::error::{ConsumerError, ProcessError};
use crate::metrics;

pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Settlement of a message whose samples could not be stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FailurePolicy {
    /// Acknowledge and drop it
    #[default]
    Ack,
    /// Ask for redelivery
    Nak,
    /// Tell the broker never to redeliver it
    Term,
}

impl FailurePolicy {
    pub fn disposition(self) -> Disposition {
        match self {
            FailurePolicy::Ack => Disposition::Ack,
            FailurePolicy::Nak => Disposition::Nak,
            FailurePolicy::Term => Disposition::Term,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub binding: QueueBinding,
    /// Upper bound on one receive wait; also bounds shutdown latency
    pub recv_timeout: Duration,
    pub failure_policy: FailurePolicy,
    pub retry: RetryConfig,
}

/// Why `run` returned
#[derive(Debug)]
pub enum LoopExit {
    Shutdown,
    BrokerFailure(TransportError),
}

/// Processes one message body; returns rows stored
#[async_trait]
pub trait MessageHandler: Send {
    async fn handle(&mut self, body: &[u8]) -> Result<u64, ProcessError>;
}

pub struct BrokerConsumer {
    connector: Arc<dyn TransportConnector>,
    retry: RetryPolicy,
    config: ConsumerConfig,
    transport: Option<Arc<dyn Transport>>,
    subscription: Option<Box<dyn Subscription>>,
    connected: Arc<AtomicBool>,
}

impl BrokerConsumer {
    pub fn new(connector: Arc<dyn TransportConnector>, config: ConsumerConfig) -> Self {
        Self {
            connector,
            retry: RetryPolicy::new(&config.retry),
            config,
            transport: None,
            subscription: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel backoff sleeps when shutdown is signalled
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.retry = self.retry.with_shutdown(shutdown);
        self
    }

    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    pub fn is_connected(&self) -> bool {
        self.subscription.is_some() && self.transport.as_ref().is_some_and(|t| t.is_connected())
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        metrics::set_broker_connected(connected);
    }

    /// Connect, declare the exchange if one is configured, then bind the
    /// queue and start consuming. Retries with backoff.
    pub async fn connect(&mut self) -> Result<(), ConsumerError> {
        let connector = Arc::clone(&self.connector);
        let binding = self.config.binding.clone();
        let target = connector.target();

        let result = self
            .retry
            .connect_with_retry(&target, || {
                let connector = Arc::clone(&connector);
                let binding = binding.clone();
                async move {
                    metrics::inc_connect_attempts();
                    let transport = connector.connect().await?;
                    if !binding.exchange.is_empty() {
                        if let Err(e) = transport.declare_exchange(&binding.exchange).await {
                            let _ = transport.close().await;
                            return Err(e);
                        }
                    }
                    match transport.consume(&binding).await {
                        Ok(subscription) => Ok::<_, TransportError>((transport, subscription)),
                        Err(e) => {
                            let _ = transport.close().await;
                            Err(e)
                        }
                    }
                }
            })
            .await;

        match result {
            Ok((transport, subscription)) => {
                info!(
                    target = %target,
                    queue = %self.config.binding.queue,
                    binding_key = %self.config.binding.binding_key,
                    prefetch = self.config.binding.prefetch,
                    "Consuming"
                );
                self.transport = Some(transport);
                self.subscription = Some(subscription);
                self.set_connected(true);
                Ok(())
            }
            Err(e) => {
                self.set_connected(false);
                self.retry.reset();
                Err(e.into())
            }
        }
    }

    /// Consume until shutdown is requested or the broker fails
    pub async fn run<H>(&mut self, handler: &mut H, shutdown: &watch::Receiver<bool>) -> LoopExit
    where
        H: MessageHandler + ?Sized,
    {
        loop {
            if *shutdown.borrow() {
                return LoopExit::Shutdown;
            }

            let Some(subscription) = self.subscription.as_mut() else {
                return LoopExit::BrokerFailure(TransportError::Closed);
            };

            let delivery = match subscription.next_timeout(self.config.recv_timeout).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => return LoopExit::BrokerFailure(e),
            };

            metrics::inc_consumed();
            let message = delivery.message();
            let tag = message.delivery_tag;
            let payload = message.payload.clone();
            debug!(
                delivery_tag = tag,
                subject = %message.subject,
                len = payload.len(),
                "Received message"
            );

            let disposition = match handler.handle(&payload).await {
                Ok(rows) => {
                    metrics::add_rows_committed(rows);
                    debug!(delivery_tag = tag, rows = rows, "Message stored");
                    Disposition::Ack
                }
                Err(e) => {
                    metrics::inc_failure(e.kind());
                    warn!(
                        delivery_tag = tag,
                        error = %e,
                        preview = %hex_preview(&payload, PREVIEW_BYTES),
                        "Message not stored"
                    );
                    self.config.failure_policy.disposition()
                }
            };

            if let Err(e) = delivery.settle(disposition).await {
                warn!(delivery_tag = tag, error = %e, "Settle failed");
                return LoopExit::BrokerFailure(e);
            }
            metrics::inc_settled(disposition.as_str());
            debug!(delivery_tag = tag, disposition = disposition.as_str(), "Settled");
        }
    }

    /// Stop consuming and close the connection; idempotent
    pub async fn disconnect(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            if let Err(e) = subscription.unsubscribe().await {
                debug!(error = %e, "Unsubscribe failed");
            }
        }
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!(error = %e, "Broker close failed");
            }
            info!(target = %self.connector.target(), "Broker consumer disconnected");
        }
        self.retry.mark_disconnected();
        self.set_connected(false);
    }
}
