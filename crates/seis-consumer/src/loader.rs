//! Transactional bulk copy of decoded samples
//!
//! Each record is one transaction: `begin`, one `send_row` per sample,
//! then `finish` (commit) or `abort` (rollback). A failure anywhere
//! leaves none of the record's rows visible.

use std::fmt::Write;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat};
use tracing::{debug, warn};

use crate::decoder::DecodedRecord;
use crate::error::{LoadError, StoreError};

/// Null marker of the COPY text format
pub const NULL_MARKER: &str = "\\N";

pub const COLUMNS: &str = "ts, net, sta, loc, chan, value, sample_rate";

/// Destination of a COPY ... FROM STDIN stream inside a transaction
#[async_trait]
pub trait CopyTarget: Send {
    /// Open a transaction and start the copy
    async fn begin(&mut self) -> Result<(), StoreError>;

    /// Stream one text-format row
    async fn send_row(&mut self, row: Bytes) -> Result<(), StoreError>;

    /// End the copy, check the server's verdict and commit. On error the
    /// transaction has been rolled back.
    async fn finish(&mut self) -> Result<u64, StoreError>;

    /// End the copy with `reason` and roll back
    async fn abort(&mut self, reason: &str);

    fn is_closed(&self) -> bool;
}

/// Opens store sessions; one call per connect attempt
#[async_trait]
pub trait StoreConnector: Send + Sync {
    type Target: CopyTarget;

    async fn connect(&self) -> Result<Self::Target, StoreError>;

    /// Human-readable target for logs
    fn target(&self) -> String;
}

fn push_escaped(out: &mut String, field: &str) {
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

/// Shortest round-trip rendering, with PostgreSQL's spelling of infinity
fn push_float(out: &mut String, v: f64) -> std::fmt::Result {
    if v.is_infinite() {
        out.push_str(if v > 0.0 { "Infinity" } else { "-Infinity" });
        Ok(())
    } else {
        write!(out, "{}", v)
    }
}

fn write_row(out: &mut String, record: &DecodedRecord, ts_ns: i64, value: f64) -> std::fmt::Result {
    let ts = DateTime::from_timestamp_nanos(ts_ns);
    out.push_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true));
    for field in [
        &record.nslc.net,
        &record.nslc.sta,
        &record.nslc.loc,
        &record.nslc.chan,
    ] {
        out.push('\t');
        push_escaped(out, field);
    }
    out.push('\t');
    push_float(out, value)?;
    out.push('\t');
    match record.sample_rate {
        Some(rate) => push_float(out, rate)?,
        None => out.push_str(NULL_MARKER),
    }
    out.push('\n');
    Ok(())
}

/// Render row `idx` of `record` into `out`:
/// `ts\tnet\tsta\tloc\tchan\tvalue\tsample_rate\n`
pub fn format_row(out: &mut String, record: &DecodedRecord, idx: usize) -> Result<(), StoreError> {
    let value = record
        .value(idx)
        .ok_or_else(|| StoreError::Rejected(format!("no sample at index {}", idx)))?;
    let ts_ns = record
        .timestamp_ns(idx)
        .ok_or_else(|| StoreError::Rejected(format!("timestamp of row {} out of range", idx)))?;
    write_row(out, record, ts_ns, value)
        .map_err(|_| StoreError::Rejected(format!("row {} could not be formatted", idx)))
}

pub struct BulkLoader<T: CopyTarget> {
    target: T,
    line: String,
}

impl<T: CopyTarget> BulkLoader<T> {
    pub fn new(target: T) -> Self {
        Self {
            target,
            line: String::with_capacity(128),
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Copy every sample of `record` in one transaction; returns rows committed
    pub async fn load(&mut self, record: &DecodedRecord) -> Result<u64, LoadError> {
        self.target.begin().await.map_err(LoadError::Begin)?;

        for idx in 0..record.len() {
            self.line.clear();
            let sent = match format_row(&mut self.line, record, idx) {
                Ok(()) => {
                    self.target
                        .send_row(Bytes::copy_from_slice(self.line.as_bytes()))
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(source) = sent {
                warn!(sid = %record.sid, row = idx, error = %source, "Aborting copy");
                self.target.abort(&source.to_string()).await;
                return Err(LoadError::Row { row: idx, source });
            }
        }

        let rows = self.target.finish().await.map_err(LoadError::Finish)?;
        debug!(sid = %record.sid, rows = rows, "Committed samples");
        Ok(rows)
    }
}
