//! seis-connector: SeedLink ingress service
//!
//! Receives packets from a SeedLink server and republishes each payload,
//! unchanged, as one broker message routed by a static key or by the
//! packet's stream identifier.

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod publisher;
pub mod receiver;
pub mod seedlink;
pub mod source;
pub mod state;
pub mod streams;

pub use config::{Args, IngressConfig};
pub use error::{AuthError, ConfigError, PublisherError, SeedLinkError, StateError};
pub use publisher::{BrokerPublisher, PublisherConfig};
pub use receiver::{ReceiverConfig, ReceiverExit, StreamReceiver};
pub use seedlink::{SeedLinkClient, SeedLinkConfig};
pub use source::{Collect, PacketInfo, PacketSource};
