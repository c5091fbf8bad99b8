use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;

pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Message envelope as seen by a consumer
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub subject: String,
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
    /// Broker-assigned delivery tag (stream sequence)
    pub delivery_tag: u64,
}

/// Outcome reported back to the broker for one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed (or deliberately dropped); do not redeliver
    Ack,
    /// Redeliver later
    Nak,
    /// Poison message; never redeliver
    Term,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Nak => "nak",
            Disposition::Term => "term",
        }
    }
}

/// Queue declaration plus its binding to an exchange
#[derive(Debug, Clone)]
pub struct QueueBinding {
    /// Empty means the default exchange (queue receives its own name)
    pub exchange: String,
    pub queue: String,
    pub binding_key: String,
    pub prefetch: u16,
}

/// A single delivered message awaiting settlement
#[async_trait]
pub trait Delivery: Send {
    fn message(&self) -> &TransportMessage;

    /// Settle the delivery. Consumes it: a message is settled once.
    async fn settle(self: Box<Self>, disposition: Disposition) -> Result<(), TransportError>;
}

/// Consumer-side handle on a bound queue
#[async_trait]
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next delivery. `Ok(None)` on timeout;
    /// `Err` when the broker connection or channel is gone.
    async fn next_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Box<dyn Delivery>>, TransportError>;

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError>;
}

/// Broker abstraction with exchange/routing-key vocabulary
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget publish. An empty exchange routes by key alone.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError>;

    /// Idempotently declare a durable topic exchange
    async fn declare_exchange(&self, exchange: &str) -> Result<(), TransportError>;

    /// Declare the queue, bind it and start consuming
    async fn consume(&self, binding: &QueueBinding) -> Result<Box<dyn Subscription>, TransportError>;

    fn is_connected(&self) -> bool;

    /// Flush pending output and release the connection
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens broker connections. One call per connect attempt.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Transport>, TransportError>;

    /// Human-readable target for logs
    fn target(&self) -> String;
}

/// Headers every published packet carries
pub fn binary_headers() -> HashMap<String, String> {
    HashMap::from([(CONTENT_TYPE_HEADER.to_string(), OCTET_STREAM.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_headers() {
        let headers = binary_headers();
        assert_eq!(headers.get("Content-Type").map(String::as_str), Some("application/octet-stream"));
    }

    #[test]
    fn test_disposition_labels() {
        assert_eq!(Disposition::Ack.as_str(), "ack");
        assert_eq!(Disposition::Nak.as_str(), "nak");
        assert_eq!(Disposition::Term.as_str(), "term");
    }
}
