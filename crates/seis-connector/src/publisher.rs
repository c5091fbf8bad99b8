//! Outbound broker connection for received packets
//!
//! Publishing is fire-and-forget: no confirmation is awaited and a failed
//! publish drops the packet. A connection found dead is rebuilt through
//! the `RetryPolicy` before the next publish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use seis_middleware::{
    binary_headers, RetryConfig, RetryPolicy, Transport, TransportConnector, TransportError,
};

use crate::error::PublisherError;
use crate::metrics;

#[derive(Debug, Clone, Default)]
pub struct PublisherConfig {
    /// Empty publishes by routing key alone
    pub exchange: String,
    /// Static routing key; empty means use the packet's stream identifier
    pub routing_key: String,
    pub retry: RetryConfig,
}

pub struct BrokerPublisher {
    connector: Arc<dyn TransportConnector>,
    retry: RetryPolicy,
    exchange: String,
    routing_key: String,
    transport: Option<Arc<dyn Transport>>,
    connected: Arc<AtomicBool>,
}

impl BrokerPublisher {
    pub fn new(connector: Arc<dyn TransportConnector>, config: PublisherConfig) -> Self {
        Self {
            connector,
            retry: RetryPolicy::new(&config.retry),
            exchange: config.exchange,
            routing_key: config.routing_key,
            transport: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel backoff sleeps when shutdown is signalled
    pub fn with_shutdown(mut self, shutdown: tokio::sync::watch::Receiver<bool>) -> Self {
        self.retry = self.retry.with_shutdown(shutdown);
        self
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Shared flag for readiness probes
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_connected())
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Open the connection and declare the exchange, retrying with backoff
    pub async fn connect(&mut self) -> Result<(), PublisherError> {
        let connector = Arc::clone(&self.connector);
        let exchange = self.exchange.clone();
        let target = connector.target();

        let result = self
            .retry
            .connect_with_retry(&target, || {
                let connector = Arc::clone(&connector);
                let exchange = exchange.clone();
                async move {
                    metrics::inc_connect_attempts();
                    let transport = connector.connect().await?;
                    if !exchange.is_empty() {
                        if let Err(e) = transport.declare_exchange(&exchange).await {
                            let _ = transport.close().await;
                            return Err(e);
                        }
                    }
                    Ok::<_, TransportError>(transport)
                }
            })
            .await;

        match result {
            Ok(transport) => {
                info!(target = %target, exchange = %self.exchange, "Broker publisher ready");
                self.transport = Some(transport);
                self.set_connected(true);
                Ok(())
            }
            Err(e) => {
                self.set_connected(false);
                // Next attempt starts a fresh cycle
                self.retry.reset();
                Err(e.into())
            }
        }
    }

    /// Reconnect if the connection was never made or has dropped
    pub async fn ensure_connected(&mut self) -> Result<(), PublisherError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.transport.take().is_some() {
            warn!(target = %self.connector.target(), "Broker connection lost");
            self.retry.mark_disconnected();
            self.set_connected(false);
        }
        self.connect().await
    }

    /// Publish one packet body. The configured routing key wins; otherwise
    /// `fallback_key` (the packet's stream identifier) is used.
    pub async fn publish(&mut self, body: &[u8], fallback_key: &str) -> Result<(), PublisherError> {
        self.ensure_connected().await?;
        let transport = self.transport.as_ref().ok_or(PublisherError::NotConnected)?;

        let routing_key = if self.routing_key.is_empty() {
            fallback_key
        } else {
            self.routing_key.as_str()
        };

        match transport
            .publish(
                &self.exchange,
                routing_key,
                Bytes::copy_from_slice(body),
                binary_headers(),
            )
            .await
        {
            Ok(()) => {
                metrics::inc_published();
                debug!(exchange = %self.exchange, routing_key = %routing_key, bytes = body.len(), "Published");
                Ok(())
            }
            Err(e) => {
                metrics::inc_publish_failures();
                if e.is_protocol() {
                    warn!(error = %e, "Broker rejected publish, rebuilding connection");
                    self.teardown().await;
                }
                Err(e.into())
            }
        }
    }

    /// Drop a connection the broker has rejected; the next publish reconnects
    async fn teardown(&mut self) {
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "Error closing rejected connection");
            }
        }
        self.retry.mark_disconnected();
        self.set_connected(false);
    }

    /// Close the connection; a no-op when already disconnected
    pub async fn disconnect(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        if let Err(e) = transport.close().await {
            error!(error = %e, "Error closing broker connection");
        }
        self.retry.mark_disconnected();
        self.set_connected(false);
        info!(target = %self.connector.target(), "Broker publisher disconnected");
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        metrics::set_broker_connected(connected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seis_middleware::transport::{CONTENT_TYPE_HEADER, OCTET_STREAM};
    use seis_middleware::{ConnectionState, InMemoryBroker, InMemoryConnector, RetryError};
    use std::time::Duration;

    fn config(exchange: &str, routing_key: &str, max_attempts: u32) -> PublisherConfig {
        PublisherConfig {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            retry: RetryConfig::from_max_attempts(max_attempts),
        }
    }

    #[tokio::test]
    async fn test_connect_declares_exchange() {
        let broker = InMemoryBroker::new();
        let connector = Arc::new(InMemoryConnector::new(broker.clone()));
        let mut publisher = BrokerPublisher::new(connector, config("seismic", "binq", 3));

        publisher.connect().await.unwrap();
        assert!(publisher.is_connected());
        assert!(broker.is_exchange_declared("seismic"));
        assert!(publisher.connected_flag().load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_static_routing_key_wins() {
        let broker = InMemoryBroker::new();
        let connector = Arc::new(InMemoryConnector::new(broker.clone()));
        let mut publisher = BrokerPublisher::new(connector, config("", "binq", 3));

        publisher.publish(b"\x00\x01record", "IU.COLA.00.B.H.Z").await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "binq");
        assert_eq!(published[0].payload.as_ref(), b"\x00\x01record");
        assert_eq!(
            published[0].headers.get(CONTENT_TYPE_HEADER).map(String::as_str),
            Some(OCTET_STREAM)
        );
    }

    #[tokio::test]
    async fn test_empty_routing_key_uses_identifier() {
        let broker = InMemoryBroker::new();
        let connector = Arc::new(InMemoryConnector::new(broker.clone()));
        let mut publisher = BrokerPublisher::new(connector, config("seismic", "", 3));

        publisher.publish(b"payload", "XX.YYYY.00.LHZ").await.unwrap();

        let published = broker.published();
        assert_eq!(published[0].exchange, "seismic");
        assert_eq!(published[0].routing_key, "XX.YYYY.00.LHZ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_with_backoff() {
        let broker = InMemoryBroker::new();
        let connector = Arc::new(InMemoryConnector::refusing(broker, 2));
        let mut publisher = BrokerPublisher::new(connector.clone(), config("", "binq", 5));

        let start = tokio::time::Instant::now();
        publisher.connect().await.unwrap();
        assert_eq!(connector.attempts(), 3);
        // 1s + 2s of backoff
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(publisher.retry_policy().attempt(), 0);
        assert_eq!(publisher.retry_policy().state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_exhausted() {
        let broker = InMemoryBroker::new();
        let connector = Arc::new(InMemoryConnector::refusing(broker, u32::MAX));
        let mut publisher = BrokerPublisher::new(connector.clone(), config("", "binq", 2));

        let err = publisher.connect().await.unwrap_err();
        assert!(matches!(
            err,
            PublisherError::Retry(RetryError::Exhausted { attempts: 2, .. })
        ));
        assert!(!publisher.is_connected());
        // Exhaustion resets the policy for the next cycle
        assert_eq!(publisher.retry_policy().attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_drop() {
        let broker = InMemoryBroker::new();
        let connector = Arc::new(InMemoryConnector::new(broker.clone()));
        let mut publisher = BrokerPublisher::new(connector.clone(), config("", "binq", 3));

        publisher.connect().await.unwrap();
        connector.last_connection().unwrap().disconnect();
        assert!(!publisher.is_connected());

        publisher.publish(b"after", "").await.unwrap();
        assert_eq!(connector.attempts(), 2);
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_reported() {
        let broker = InMemoryBroker::new();
        let connector = Arc::new(InMemoryConnector::new(broker.clone()));
        let mut publisher = BrokerPublisher::new(connector.clone(), config("", "binq", 3));
        publisher.connect().await.unwrap();
        connector.last_connection().unwrap().set_fail_publish(true);

        let err = publisher.publish(b"lost", "").await.unwrap_err();
        assert!(matches!(err, PublisherError::Transport(TransportError::PublishFailed(_))));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_publish_rebuilds_connection() {
        let broker = InMemoryBroker::new();
        let connector = Arc::new(InMemoryConnector::new(broker.clone()));
        let mut publisher = BrokerPublisher::new(connector.clone(), config("", "binq", 3));
        publisher.connect().await.unwrap();
        let rejected = connector.last_connection().unwrap();
        rejected.set_fail_publish(true);

        assert!(publisher.publish(b"lost", "").await.is_err());
        assert!(!publisher.is_connected());
        assert!(!publisher.connected_flag().load(Ordering::SeqCst));
        assert!(!rejected.is_connected());

        publisher.publish(b"kept", "").await.unwrap();
        assert_eq!(connector.attempts(), 2);
        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload.as_ref(), b"kept");
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let broker = InMemoryBroker::new();
        let connector = Arc::new(InMemoryConnector::new(broker));
        let mut publisher = BrokerPublisher::new(connector, config("", "binq", 3));

        publisher.disconnect().await;
        publisher.connect().await.unwrap();
        publisher.disconnect().await;
        publisher.disconnect().await;
        assert!(!publisher.is_connected());
    }
}
