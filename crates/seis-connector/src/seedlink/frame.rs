//! SeedLink wire framing.
//!
//! Protocol 3 packets: `SL` + 6 hex digit sequence + 512-byte miniSEED 2
//! record, or `SLINFO` + 2 bytes + 512-byte INFO record.
//!
//! Protocol 4 packets: `SE` + format + subformat + u32 LE payload length
//! + u64 LE sequence + u8 station id length + station id + payload.

use std::ops::Range;

use crate::error::SeedLinkError;

pub const V3_HEADER_LEN: usize = 8;
pub const V3_RECORD_LEN: usize = 512;
pub const V4_FIXED_HEADER_LEN: usize = 17;

/// v3 sequence numbers are 24-bit
pub const V3_SEQ_MASK: u64 = 0xFF_FFFF;

/// Guard against garbage length fields
const V4_MAX_PAYLOAD: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V3,
    V4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    /// INFO responses (including keepalive replies); never forwarded
    Info,
}

/// Location of one complete packet inside the receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub seqnum: u64,
    /// Payload format tag, e.g. `b'2'` or `b'3'`
    pub format: u8,
    pub subformat: u8,
    pub station: Option<Range<usize>>,
    pub payload: Range<usize>,
    /// Bytes to consume from the buffer
    pub total: usize,
}

impl FrameHeader {
    pub fn payload_len(&self) -> usize {
        self.payload.end - self.payload.start
    }
}

/// Locate the next packet; `Ok(None)` until the buffer holds a whole one
pub fn parse_frame(buf: &[u8], version: ProtocolVersion) -> Result<Option<FrameHeader>, SeedLinkError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    match version {
        ProtocolVersion::V3 => parse_v3(buf),
        ProtocolVersion::V4 => parse_v4(buf),
    }
}

fn unexpected(buf: &[u8]) -> SeedLinkError {
    let shown: String = buf
        .iter()
        .take(16)
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect();
    SeedLinkError::Protocol(format!("unexpected bytes in stream: '{}'", shown))
}

fn parse_v3(buf: &[u8]) -> Result<Option<FrameHeader>, SeedLinkError> {
    if &buf[0..2] != b"SL" {
        return Err(unexpected(buf));
    }
    if buf.len() < V3_HEADER_LEN {
        return Ok(None);
    }

    let header = &buf[2..V3_HEADER_LEN];
    let (kind, seqnum) = if header.starts_with(b"INFO") {
        (FrameKind::Info, 0)
    } else {
        let text = std::str::from_utf8(header).map_err(|_| unexpected(buf))?;
        let seq = u64::from_str_radix(text, 16).map_err(|_| unexpected(buf))?;
        (FrameKind::Data, seq)
    };

    let total = V3_HEADER_LEN + V3_RECORD_LEN;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(FrameHeader {
        kind,
        seqnum,
        format: b'2',
        subformat: b'D',
        station: None,
        payload: V3_HEADER_LEN..total,
        total,
    }))
}

fn parse_v4(buf: &[u8]) -> Result<Option<FrameHeader>, SeedLinkError> {
    if &buf[0..2] != b"SE" {
        return Err(unexpected(buf));
    }
    if buf.len() < V4_FIXED_HEADER_LEN {
        return Ok(None);
    }

    let format = buf[2];
    let subformat = buf[3];
    let payload_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if payload_len > V4_MAX_PAYLOAD {
        return Err(SeedLinkError::Protocol(format!(
            "implausible payload length {}",
            payload_len
        )));
    }
    let seqnum = u64::from_le_bytes([
        buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
    ]);
    let station_len = usize::from(buf[16]);

    let station = V4_FIXED_HEADER_LEN..V4_FIXED_HEADER_LEN + station_len;
    let payload = station.end..station.end + payload_len as usize;
    let total = payload.end;
    if buf.len() < total {
        return Ok(None);
    }

    // JSON info responses and explicit INFO subformat
    let kind = if format == b'J' || subformat == b'I' {
        FrameKind::Info
    } else {
        FrameKind::Data
    };

    Ok(Some(FrameHeader {
        kind,
        seqnum,
        format,
        subformat,
        station: (station_len > 0).then_some(station),
        payload,
        total,
    }))
}

/// `NET_STA` from a miniSEED 2 header, for protocol 3 packets
pub fn v2_station_key(record: &[u8]) -> Option<String> {
    if record.len() < 20 {
        return None;
    }
    let trim = |b: &[u8]| -> Option<String> {
        std::str::from_utf8(b)
            .ok()
            .map(|s| s.trim_end_matches([' ', '\0']).to_string())
    };
    let sta = trim(&record[8..13])?;
    let net = trim(&record[18..20])?;
    Some(format!("{}_{}", net, sta))
}

/// Argument for DATA when resuming after `last`
pub fn resume_argument(last: u64, version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::V3 => format!("{:06X}", (last + 1) & V3_SEQ_MASK),
        ProtocolVersion::V4 => (last + 1).to_string(),
    }
}

/// One line of a command response, without the line terminator
pub fn take_line(buf: &[u8]) -> Option<(String, usize)> {
    let end = buf.iter().position(|&b| b == b'\n')?;
    let line = String::from_utf8_lossy(&buf[..end])
        .trim_end_matches('\r')
        .to_string();
    Some((line, end + 1))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn v3_packet(seq: u32, record: &[u8]) -> Vec<u8> {
        let mut out = format!("SL{:06X}", seq).into_bytes();
        let mut rec = record.to_vec();
        rec.resize(V3_RECORD_LEN, 0);
        out.extend_from_slice(&rec);
        out
    }

    pub(crate) fn v4_packet(format: u8, subformat: u8, seq: u64, station: &str, payload: &[u8]) -> Vec<u8> {
        let mut out = b"SE".to_vec();
        out.push(format);
        out.push(subformat);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&seq.to_le_bytes());
        out.push(station.len() as u8);
        out.extend_from_slice(station.as_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_v3_data_packet() {
        let pkt = v3_packet(0x00_1A2B, b"000001D COLA 00BHZIU");
        let header = parse_frame(&pkt, ProtocolVersion::V3).unwrap().unwrap();
        assert_eq!(header.kind, FrameKind::Data);
        assert_eq!(header.seqnum, 0x1A2B);
        assert_eq!(header.payload_len(), 512);
        assert_eq!(header.total, 520);
        assert_eq!(v2_station_key(&pkt[header.payload]), Some("IU_COLA".to_string()));
    }

    #[test]
    fn test_v3_incomplete() {
        let pkt = v3_packet(1, b"");
        assert_eq!(parse_frame(&pkt[..300], ProtocolVersion::V3).unwrap(), None);
        assert_eq!(parse_frame(&pkt[..5], ProtocolVersion::V3).unwrap(), None);
    }

    #[test]
    fn test_v3_info_packet() {
        let mut pkt = b"SLINFO *".to_vec();
        pkt.resize(520, b' ');
        let header = parse_frame(&pkt, ProtocolVersion::V3).unwrap().unwrap();
        assert_eq!(header.kind, FrameKind::Info);
    }

    #[test]
    fn test_v3_garbage() {
        assert!(parse_frame(b"ERROR\r\n", ProtocolVersion::V3).is_err());
        assert!(parse_frame(b"SLZZZZZZ", ProtocolVersion::V3).is_err());
    }

    #[test]
    fn test_v4_data_packet() {
        let pkt = v4_packet(b'3', b'D', 123_456_789_012, "IU_COLA", b"payload");
        let header = parse_frame(&pkt, ProtocolVersion::V4).unwrap().unwrap();
        assert_eq!(header.kind, FrameKind::Data);
        assert_eq!(header.format, b'3');
        assert_eq!(header.seqnum, 123_456_789_012);
        assert_eq!(&pkt[header.station.clone().unwrap()], b"IU_COLA");
        assert_eq!(&pkt[header.payload.clone()], b"payload");
        assert_eq!(header.total, pkt.len());

        assert_eq!(parse_frame(&pkt[..pkt.len() - 1], ProtocolVersion::V4).unwrap(), None);
    }

    #[test]
    fn test_v4_info_packet() {
        let pkt = v4_packet(b'J', b'I', 0, "", b"{}");
        let header = parse_frame(&pkt, ProtocolVersion::V4).unwrap().unwrap();
        assert_eq!(header.kind, FrameKind::Info);
        assert_eq!(header.station, None);
    }

    #[test]
    fn test_resume_argument() {
        assert_eq!(resume_argument(0x1A, ProtocolVersion::V3), "00001B");
        assert_eq!(resume_argument(0xFF_FFFF, ProtocolVersion::V3), "000000");
        assert_eq!(resume_argument(41, ProtocolVersion::V4), "42");
    }

    #[test]
    fn test_take_line() {
        assert_eq!(take_line(b"OK\r\nrest"), Some(("OK".to_string(), 4)));
        assert_eq!(take_line(b"partial"), None);
    }
}
