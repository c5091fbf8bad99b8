//! Error types for seis-mseed

use thiserror::Error;

/// Packet-level failures while deriving a stream identifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("packet too short: {len} bytes, need {needed}")]
    TooShort { len: usize, needed: usize },

    #[error("unsupported packet format '{0}'")]
    UnsupportedFormat(char),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("identifier exceeds {capacity} bytes")]
    IdentifierTooLong { capacity: usize },
}

/// Record-level decode failures
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("CRC mismatch: header {expected:#010x}, computed {computed:#010x}")]
    Crc { expected: u32, computed: u32 },

    #[error("unsupported sample encoding {0}")]
    UnsupportedSampleType(u8),

    #[error("invalid sample rate {0}")]
    InvalidSampleRate(f64),

    #[error("identifier: {0}")]
    Identifier(#[from] FormatError),
}

impl DecodeError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        DecodeError::Parse(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
