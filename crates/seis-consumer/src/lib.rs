//! seis-consumer: broker to PostgreSQL egress service
//!
//! Consumes miniSEED records from a broker queue, decodes each into its
//! samples and bulk-copies them into PostgreSQL, one transaction per
//! message.

pub mod config;
pub mod consumer;
pub mod decoder;
pub mod error;
pub mod loader;
pub mod memory;
pub mod metrics;
pub mod postgres;
pub mod service;

#[cfg(test)]
mod testing;

pub use config::{Args, EgressConfig};
pub use consumer::{BrokerConsumer, ConsumerConfig, FailurePolicy, LoopExit, MessageHandler};
pub use decoder::{DecodedRecord, RecordDecoder};
pub use error::{ConfigError, ConsumerError, LoadError, ProcessError, StoreError};
pub use loader::{BulkLoader, CopyTarget, StoreConnector};
pub use memory::MemoryStore;
pub use postgres::{PgConnector, StoreConfig};
pub use service::{run_service, Pipeline};
