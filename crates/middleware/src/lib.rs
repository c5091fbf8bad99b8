//! seis-middleware: Broker plumbing shared by the seis services
//!
//! Provides the reconnect policy, a broker-neutral transport abstraction
//! (NATS JetStream for production, in-memory for tests), broker
//! configuration and the health/metrics HTTP router.

pub mod config;
pub mod error;
pub mod memory;
pub mod nats;
pub mod preview;
pub mod retry;
pub mod server;
pub mod transport;

pub use config::{BrokerConfig, RetryConfig};
pub use error::{RetryError, TransportError};
pub use memory::{InMemoryBroker, InMemoryConnector, InMemoryTransport, PublishedMessage};
pub use nats::{NatsConnector, NatsTransport, SubjectBuilder};
pub use preview::hex_preview;
pub use retry::{ConnectionState, RetryPolicy};
pub use server::{encode_metrics, serve_status, status_router, BrokerLink, ServiceStatus, StatusReport};
pub use transport::{
    binary_headers, Delivery, Disposition, QueueBinding, Subscription, Transport,
    TransportConnector, TransportMessage,
};
