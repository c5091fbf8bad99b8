//! Stream identifier derivation from raw packet headers.
//!
//! miniSEED 2 records carry fixed-width NSLC fields in their 48-byte
//! header; miniSEED 3 records carry an FDSN source identifier directly.
//! Either way the result is normalized to dotted form, e.g.
//! `FDSN:IU_COLA_00_B_H_Z` becomes `IU.COLA.00.B.H.Z`.

use std::fmt::Write;

use arrayvec::ArrayString;

use crate::error::FormatError;

pub const SID_CAPACITY: usize = 64;

/// Bounded identifier storage; overflow is an error, never a truncation
pub type SourceId = ArrayString<SID_CAPACITY>;

pub const FDSN_PREFIX: &str = "FDSN:";

/// Fixed header length of a miniSEED 2 record
pub const V2_HEADER_LEN: usize = 48;
/// Fixed header length of a miniSEED 3 record
pub const V3_HEADER_LEN: usize = 40;
pub(crate) const V3_SID_LEN_OFFSET: usize = 33;

/// Declared payload format of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    MiniSeed2,
    MiniSeed3,
}

impl PayloadFormat {
    /// Map a single-character format tag ('2' or '3')
    pub fn from_tag(tag: u8) -> Result<Self, FormatError> {
        match tag {
            b'2' => Ok(PayloadFormat::MiniSeed2),
            b'3' => Ok(PayloadFormat::MiniSeed3),
            other => Err(FormatError::UnsupportedFormat(other as char)),
        }
    }
}

/// Derive the normalized stream identifier for a packet.
/// Pure function of the format tag and header bytes.
pub fn stream_identifier(format_tag: u8, payload: &[u8]) -> Result<SourceId, FormatError> {
    let raw = match PayloadFormat::from_tag(format_tag)? {
        PayloadFormat::MiniSeed2 => v2_source_id(payload)?,
        PayloadFormat::MiniSeed3 => v3_source_id(payload)?,
    };
    normalize(&raw)
}

/// Strip a leading `FDSN:` and turn underscores into periods.
/// Idempotent on its own output.
pub fn normalize(sid: &str) -> Result<SourceId, FormatError> {
    let body = sid.strip_prefix(FDSN_PREFIX).unwrap_or(sid);
    let mut out = SourceId::new();
    for c in body.chars() {
        let c = if c == '_' { '.' } else { c };
        out.try_push(c)
            .map_err(|_| FormatError::IdentifierTooLong { capacity: SID_CAPACITY })?;
    }
    Ok(out)
}

/// Fixed-width header field with trailing padding removed
fn field(payload: &[u8], start: usize, end: usize) -> Result<&str, FormatError> {
    let bytes = &payload[start..end];
    let text = std::str::from_utf8(bytes)
        .map_err(|_| FormatError::InvalidHeader(format!("non-ASCII bytes at {}..{}", start, end)))?;
    Ok(text.trim_end_matches([' ', '\0']))
}

/// `FDSN:NET_STA_LOC_B_S_P` from a miniSEED 2 fixed header
pub fn v2_source_id(payload: &[u8]) -> Result<SourceId, FormatError> {
    if payload.len() < V2_HEADER_LEN {
        return Err(FormatError::TooShort {
            len: payload.len(),
            needed: V2_HEADER_LEN,
        });
    }

    let sta = field(payload, 8, 13)?;
    let loc = field(payload, 13, 15)?;
    let chan = field(payload, 15, 18)?;
    let net = field(payload, 18, 20)?;

    let mut sid = SourceId::new();
    write_sid(&mut sid, net, sta, loc, chan)
        .map_err(|_| FormatError::IdentifierTooLong { capacity: SID_CAPACITY })?;
    Ok(sid)
}

fn write_sid(out: &mut SourceId, net: &str, sta: &str, loc: &str, chan: &str) -> std::fmt::Result {
    write!(out, "{}{}_{}_{}_", FDSN_PREFIX, net, sta, loc)?;
    let mut codes = chan.chars();
    match (codes.next(), codes.next(), codes.next(), codes.next()) {
        (Some(band), Some(source), Some(position), None) => {
            write!(out, "{}_{}_{}", band, source, position)
        }
        // Non-SEED channel codes are carried through unexpanded
        _ => write!(out, "{}", chan),
    }
}

/// Source identifier string embedded in a miniSEED 3 header
pub fn v3_source_id(payload: &[u8]) -> Result<SourceId, FormatError> {
    if payload.len() < V3_HEADER_LEN {
        return Err(FormatError::TooShort {
            len: payload.len(),
            needed: V3_HEADER_LEN,
        });
    }

    let sid_len = usize::from(payload[V3_SID_LEN_OFFSET]);
    let needed = V3_HEADER_LEN + sid_len;
    if payload.len() < needed {
        return Err(FormatError::TooShort {
            len: payload.len(),
            needed,
        });
    }

    let text = std::str::from_utf8(&payload[V3_HEADER_LEN..needed])
        .map_err(|_| FormatError::InvalidHeader("source identifier is not UTF-8".to_string()))?;
    SourceId::from(text).map_err(|_| FormatError::IdentifierTooLong { capacity: SID_CAPACITY })
}

/// Network/station/location/channel split out of a normalized identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nslc {
    pub net: String,
    pub sta: String,
    pub loc: String,
    pub chan: String,
}

impl Nslc {
    /// Split `FDSN:NET_STA_LOC_B_S_SS` (or its dotted form). The channel is
    /// band, source and subsource joined back together.
    pub fn from_sid(sid: &str) -> Result<Self, FormatError> {
        let body = sid.strip_prefix(FDSN_PREFIX).unwrap_or(sid);
        let sep = if body.contains('_') { '_' } else { '.' };
        let parts: Vec<&str> = body.split(sep).collect();
        if parts.len() < 4 {
            return Err(FormatError::InvalidHeader(format!(
                "source identifier '{}' lacks NET, STA, LOC and CHAN",
                sid
            )));
        }

        Ok(Self {
            net: parts[0].to_string(),
            sta: parts[1].to_string(),
            loc: parts[2].to_string(),
            chan: parts[3..].concat(),
        })
    }
}
