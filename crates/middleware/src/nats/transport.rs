use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_nats::connection::State;
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::stream::{Config, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, AckKind, Context};
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, info};

use super::subjects::SubjectBuilder;
use crate::config::BrokerConfig;
use crate::error::TransportError;
use crate::transport::{
    Delivery, Disposition, QueueBinding, Subscription, Transport, TransportConnector,
    TransportMessage, CONTENT_TYPE_HEADER,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PULL_HEARTBEAT: Duration = Duration::from_secs(5);

/// Opens NATS connections from a `BrokerConfig`
pub struct NatsConnector {
    config: BrokerConfig,
}

impl NatsConnector {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportConnector for NatsConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = NatsTransport::connect(&self.config).await?;
        Ok(Arc::new(transport))
    }

    fn target(&self) -> String {
        self.config.endpoint()
    }
}

/// One JetStream delivery awaiting ack/nak/term
struct NatsDelivery {
    message: TransportMessage,
    raw: jetstream::Message,
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn message(&self) -> &TransportMessage {
        &self.message
    }

    async fn settle(self: Box<Self>, disposition: Disposition) -> Result<(), TransportError> {
        let kind = match disposition {
            Disposition::Ack => AckKind::Ack,
            Disposition::Nak => AckKind::Nak(None),
            Disposition::Term => AckKind::Term,
        };
        self.raw
            .ack_with(kind)
            .await
            .map_err(|e| TransportError::AckFailed(e.to_string()))
    }
}

/// Pull-consumer message stream
struct NatsSubscription {
    client: Client,
    messages: pull::Stream,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Box<dyn Delivery>>, TransportError> {
        let next = match tokio::time::timeout(timeout, self.messages.next()).await {
            Ok(next) => next,
            Err(_) => {
                // Quiet period; make sure it is not a dead connection
                if matches!(self.client.connection_state(), State::Disconnected) {
                    return Err(TransportError::Closed);
                }
                return Ok(None);
            }
        };

        let raw = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return Err(TransportError::SubscribeFailed(e.to_string())),
            None => return Err(TransportError::Closed),
        };

        let delivery_tag = raw.info().map(|info| info.stream_sequence).unwrap_or(0);
        let mut headers = HashMap::new();
        if let Some(content_type) = raw
            .headers
            .as_ref()
            .and_then(|h| h.get(CONTENT_TYPE_HEADER))
        {
            headers.insert(CONTENT_TYPE_HEADER.to_string(), content_type.as_str().to_string());
        }

        let message = TransportMessage {
            subject: raw.subject.to_string(),
            payload: raw.payload.clone(),
            headers,
            delivery_tag,
        };
        Ok(Some(Box::new(NatsDelivery { message, raw })))
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        // Durable consumer state stays on the server
        Ok(())
    }
}

/// NATS transport: core publish, JetStream streams as exchanges and
/// durable pull consumers as queues
pub struct NatsTransport {
    client: Client,
    jetstream: Context,
    subjects: SubjectBuilder,
}

impl NatsTransport {
    /// Create a new NatsTransport from an existing client
    pub fn new(client: Client, namespace: Option<&str>) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            subjects: SubjectBuilder::new(namespace),
        }
    }

    /// Connect to the NATS server described by `config`
    pub async fn connect(config: &BrokerConfig) -> Result<Self, TransportError> {
        let mut options = ConnectOptions::new().connection_timeout(CONNECT_TIMEOUT);
        if !config.user.is_empty() {
            options = options.user_and_password(config.user.clone(), config.password.clone());
        }

        let client = options
            .connect(config.url())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!(server = %config.endpoint(), "Connected to NATS");
        Ok(Self::new(client, config.namespace()))
    }

    /// Get-or-create a durable file-backed stream
    async fn ensure_stream(
        &self,
        stream_name: &str,
        subjects: Vec<String>,
    ) -> Result<jetstream::stream::Stream, TransportError> {
        let config = Config {
            name: stream_name.to_string(),
            subjects,
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| TransportError::DeclareFailed(format!("stream {}: {}", stream_name, e)))
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        let subject = self.subjects.publish_subject(exchange, routing_key);

        let mut nats_headers = async_nats::HeaderMap::new();
        for (k, v) in headers {
            nats_headers.insert(k.as_str(), v.as_str());
        }

        self.client
            .publish_with_headers(subject.to_string(), nats_headers, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    async fn declare_exchange(&self, exchange: &str) -> Result<(), TransportError> {
        let name = self.subjects.stream_name(exchange);
        self.ensure_stream(&name, vec![self.subjects.exchange_wildcard(exchange)])
            .await?;
        debug!(exchange = %exchange, stream = %name, "Exchange declared");
        Ok(())
    }

    async fn consume(&self, binding: &QueueBinding) -> Result<Box<dyn Subscription>, TransportError> {
        let (stream_name, stream_subject, filter) = if binding.exchange.is_empty() {
            let subject = self.subjects.queue_subject(&binding.queue);
            (self.subjects.stream_name(&binding.queue), subject.clone(), subject)
        } else {
            (
                self.subjects.stream_name(&binding.exchange),
                self.subjects.exchange_wildcard(&binding.exchange),
                self.subjects.binding_filter(&binding.exchange, &binding.binding_key),
            )
        };

        let stream = self.ensure_stream(&stream_name, vec![stream_subject]).await?;

        let durable = self.subjects.stream_name(&binding.queue);
        let consumer = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    filter_subject: filter.clone(),
                    ack_policy: AckPolicy::Explicit,
                    max_ack_pending: i64::from(binding.prefetch.max(1)),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TransportError::SubscribeFailed(format!("consumer {}: {}", durable, e)))?;

        let messages = consumer
            .stream()
            .max_messages_per_batch(usize::from(binding.prefetch.max(1)))
            .heartbeat(PULL_HEARTBEAT)
            .messages()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;

        info!(
            stream = %stream_name,
            consumer = %durable,
            filter = %filter,
            prefetch = binding.prefetch,
            "Consuming"
        );

        Ok(Box::new(NatsSubscription {
            client: self.client.clone(),
            messages,
        }))
    }

    fn is_connected(&self) -> bool {
        matches!(self.client.connection_state(), State::Connected)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }
}
