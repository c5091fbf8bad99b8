//! In-memory implementations for testing
pub mod transport;

pub use transport::{
    topic_matches, InMemoryBroker, InMemoryConnector, InMemoryTransport, PublishedMessage,
};
