//! Record builders shared by the unit tests

use seis_mseed::crc::crc32c;

/// 2024-001T00:00:00Z as epoch nanoseconds
pub(crate) const T0_NS: i64 = 1_704_067_200_000_000_000;

pub(crate) fn ints(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// miniSEED 3 record starting at `T0_NS`, with a valid CRC
pub(crate) fn v3_record_with_count(sid: &str, encoding: u8, rate: f64, count: u32, data: &[u8]) -> Vec<u8> {
    let mut rec = vec![0u8; 40];
    rec[0..2].copy_from_slice(b"MS");
    rec[2] = 3;
    rec[8..10].copy_from_slice(&2024u16.to_le_bytes());
    rec[10..12].copy_from_slice(&1u16.to_le_bytes());
    rec[15] = encoding;
    rec[16..24].copy_from_slice(&rate.to_le_bytes());
    rec[24..28].copy_from_slice(&count.to_le_bytes());
    rec[32] = 1;
    rec[33] = sid.len() as u8;
    rec[36..40].copy_from_slice(&(data.len() as u32).to_le_bytes());
    rec.extend_from_slice(sid.as_bytes());
    rec.extend_from_slice(data);

    let crc = crc32c(&rec);
    rec[28..32].copy_from_slice(&crc.to_le_bytes());
    rec
}

/// Sample count inferred from the encoding's word size
pub(crate) fn v3_record(sid: &str, encoding: u8, rate: f64, data: &[u8]) -> Vec<u8> {
    let width = match encoding {
        1 => 2,
        3 | 4 => 4,
        5 => 8,
        _ => 0,
    };
    let count = if width == 0 { 0 } else { data.len() / width };
    v3_record_with_count(sid, encoding, rate, count as u32, data)
}
