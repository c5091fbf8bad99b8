use thiserror::Error;

use seis_middleware::{RetryError, TransportError};

#[derive(Error, Debug)]
pub enum SeedLinkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("server rejected {command}: {response}")]
    Rejected { command: String, response: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("credentials unavailable: {0}")]
    Unavailable(String),
    #[error("auth value exceeds {capacity} bytes")]
    TooLarge { capacity: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Retry(#[from] RetryError),
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed state file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid server address '{0}'")]
    ServerAddress(String),
    #[error("invalid stream selection '{0}'")]
    Selection(String),
    #[error("stream list {path}: {source}")]
    StreamList {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
