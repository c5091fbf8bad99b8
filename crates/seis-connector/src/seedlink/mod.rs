//! SeedLink protocol 3 and 4 client

pub mod client;
pub mod frame;

pub use client::{ProtocolPreference, SeedLinkClient, SeedLinkConfig};
pub use frame::{FrameHeader, FrameKind, ProtocolVersion};
