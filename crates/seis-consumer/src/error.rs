use thiserror::Error;

use seis_middleware::{RetryError, TransportError};
use seis_mseed::DecodeError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("store connection closed")]
    Closed,

    #[error("no copy in progress")]
    NotCopying,

    #[error("store rejected copy: {0}")]
    Rejected(String),
}

/// A message's samples could not be committed; nothing from it is visible
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to start copy: {0}")]
    Begin(#[source] StoreError),

    #[error("row {row} failed, copy rolled back: {source}")]
    Row {
        row: usize,
        #[source]
        source: StoreError,
    },

    #[error("copy not committed: {0}")]
    Finish(#[source] StoreError),
}

/// Terminal for one message only
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("load failed: {0}")]
    Load(#[from] LoadError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] RetryError),
}

impl ProcessError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::Decode(_) => "decode",
            ProcessError::Load(_) => "store",
            ProcessError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
