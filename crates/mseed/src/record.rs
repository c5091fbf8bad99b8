//! miniSEED record parsing (format versions 2 and 3)

use chrono::{NaiveDate, NaiveDateTime};

use crate::crc::crc32c_update;
use crate::encoding::{unpack, Encoding, Endian, Samples};
use crate::error::{DecodeError, Result};
use crate::sid::{v2_source_id, Nslc, SourceId, FDSN_PREFIX, V2_HEADER_LEN, V3_HEADER_LEN};

const V3_CRC_OFFSET: usize = 28;

/// B1000 data-only SEED blockette
const BLOCKETTE_DATA_ONLY: u16 = 1000;
/// B100 actual sample rate
const BLOCKETTE_SAMPLE_RATE: u16 = 100;
/// B1001 data extension (microsecond offset)
const BLOCKETTE_DATA_EXT: u16 = 1001;

/// Activity flag bit: time correction already applied
const ACTIVITY_TIME_CORRECTED: u8 = 0x02;

/// One decoded record
#[derive(Debug, Clone)]
pub struct MsRecord {
    /// Source identifier in `FDSN:` form
    pub sid: SourceId,
    pub nslc: Nslc,
    pub format_version: u8,
    /// Nanoseconds since the Unix epoch
    pub start_time_ns: i64,
    /// Samples per second (0 when undeclared)
    pub sample_rate: f64,
    pub encoding: u8,
    pub sample_count: usize,
    pub record_length: usize,
    pub samples: Samples,
}

/// Parse a whole record, validating CRC (v3) and unpacking samples
pub fn decode_record(payload: &[u8]) -> Result<MsRecord> {
    if payload.len() >= 3 && &payload[0..2] == b"MS" && payload[2] == 3 {
        decode_v3(payload)
    } else {
        decode_v2(payload)
    }
}

fn epoch_ns(
    year: u16,
    doy: u16,
    hour: u8,
    min: u8,
    sec: u8,
    nanos: i64,
) -> Result<i64> {
    let date = NaiveDate::from_yo_opt(i32::from(year), u32::from(doy))
        .ok_or_else(|| DecodeError::parse(format!("invalid date {}-{:03}", year, doy)))?;
    // Leap second (sec == 60) folds into the next minute
    let base: NaiveDateTime = date
        .and_hms_opt(u32::from(hour), u32::from(min), 0)
        .ok_or_else(|| DecodeError::parse(format!("invalid time {:02}:{:02}", hour, min)))?;
    if sec > 60 {
        return Err(DecodeError::parse(format!("invalid second {}", sec)));
    }
    let secs = base.and_utc().timestamp() + i64::from(sec);
    secs.checked_mul(1_000_000_000)
        .and_then(|ns| ns.checked_add(nanos))
        .ok_or_else(|| {
            DecodeError::parse(format!(
                "start time {}-{:03} outside the nanosecond epoch range",
                year, doy
            ))
        })
}

/// Nominal rate from SEED factor/multiplier
fn nominal_rate(factor: i16, multiplier: i16) -> f64 {
    let f = f64::from(factor);
    let m = f64::from(multiplier);
    match (factor.signum(), multiplier.signum()) {
        (1, 1) => f * m,
        (1, -1) => -f / m,
        (-1, 1) => -m / f,
        (-1, -1) => 1.0 / (f * m),
        _ => 0.0,
    }
}

fn plausible_btime(endian: Endian, payload: &[u8]) -> bool {
    match (endian.u16(payload, 20), endian.u16(payload, 22)) {
        (Ok(year), Ok(day)) => (1900..=2100).contains(&year) && (1..=366).contains(&day),
        _ => false,
    }
}

fn decode_v2(payload: &[u8]) -> Result<MsRecord> {
    if payload.len() < V2_HEADER_LEN {
        return Err(DecodeError::parse(format!(
            "record is {} bytes, shorter than the {}-byte fixed header",
            payload.len(),
            V2_HEADER_LEN
        )));
    }
    if !b"DRQM".contains(&payload[6]) {
        return Err(DecodeError::parse(format!(
            "unrecognized data quality indicator 0x{:02x}",
            payload[6]
        )));
    }

    let hdr = if plausible_btime(Endian::Big, payload) {
        Endian::Big
    } else if plausible_btime(Endian::Little, payload) {
        Endian::Little
    } else {
        return Err(DecodeError::parse("cannot determine header byte order"));
    };

    let year = hdr.u16(payload, 20)?;
    let doy = hdr.u16(payload, 22)?;
    let (hour, min, sec) = (payload[24], payload[25], payload[26]);
    let fract = hdr.u16(payload, 28)?;
    let sample_count = usize::from(hdr.u16(payload, 30)?);
    let factor = hdr.i16(payload, 32)?;
    let multiplier = hdr.i16(payload, 34)?;
    let activity = payload[36];
    let time_correction = hdr.i32(payload, 40)?;
    let data_offset = usize::from(hdr.u16(payload, 44)?);
    let mut next_blockette = usize::from(hdr.u16(payload, 46)?);

    let mut sample_rate = nominal_rate(factor, multiplier);
    let mut b1000: Option<(u8, Endian, usize)> = None;
    let mut microseconds = 0i64;

    // Walk the blockette chain; offsets must strictly increase
    let mut last = 0usize;
    while next_blockette != 0 {
        if next_blockette <= last || next_blockette + 4 > payload.len() {
            return Err(DecodeError::parse(format!(
                "blockette offset {} out of sequence",
                next_blockette
            )));
        }
        let at = next_blockette;
        let kind = hdr.u16(payload, at)?;
        let next = usize::from(hdr.u16(payload, at + 2)?);

        match kind {
            BLOCKETTE_DATA_ONLY => {
                let encoding = *payload
                    .get(at + 4)
                    .ok_or_else(|| DecodeError::parse("truncated blockette 1000"))?;
                let word_order = payload.get(at + 5).copied().unwrap_or(1);
                let exponent = payload.get(at + 6).copied().unwrap_or(0);
                if !(7..=20).contains(&exponent) {
                    return Err(DecodeError::parse(format!(
                        "record length exponent {} out of range",
                        exponent
                    )));
                }
                let data_endian = if word_order == 0 { Endian::Little } else { Endian::Big };
                b1000 = Some((encoding, data_endian, 1usize << exponent));
            }
            BLOCKETTE_SAMPLE_RATE => {
                let rate = hdr.f32(payload, at + 4)?;
                if rate != 0.0 {
                    sample_rate = f64::from(rate);
                }
            }
            BLOCKETTE_DATA_EXT => {
                let usec = *payload
                    .get(at + 5)
                    .ok_or_else(|| DecodeError::parse("truncated blockette 1001"))?;
                microseconds = i64::from(usec as i8);
            }
            _ => {}
        }

        last = at;
        next_blockette = next;
    }

    let (encoding, data_endian, record_length) =
        b1000.ok_or_else(|| DecodeError::parse("blockette 1000 missing"))?;
    if payload.len() < record_length {
        return Err(DecodeError::parse(format!(
            "record length {} exceeds payload of {} bytes",
            record_length,
            payload.len()
        )));
    }

    // BTIME fraction and time correction are in 0.0001 s units
    let mut nanos = i64::from(fract) * 100_000 + microseconds * 1_000;
    if activity & ACTIVITY_TIME_CORRECTED == 0 {
        nanos += i64::from(time_correction) * 100_000;
    }
    let start_time_ns = epoch_ns(year, doy, hour, min, sec, nanos)?;

    let sid = v2_source_id(payload)?;
    let nslc = Nslc::from_sid(&sid)?;

    let samples = if sample_count == 0 {
        Samples::Int(Vec::new())
    } else {
        if data_offset < V2_HEADER_LEN || data_offset > record_length {
            return Err(DecodeError::parse(format!(
                "data offset {} outside record of {} bytes",
                data_offset, record_length
            )));
        }
        let enc = Encoding::from_code(encoding)?;
        let data = &payload[data_offset..record_length];
        // Steim frames are big-endian regardless of the declared word order
        let endian = match enc {
            Encoding::Steim1 | Encoding::Steim2 => Endian::Big,
            _ => data_endian,
        };
        unpack(enc, data, sample_count, endian)?
    };

    Ok(MsRecord {
        sid,
        nslc,
        format_version: 2,
        start_time_ns,
        sample_rate,
        encoding,
        sample_count,
        record_length,
        samples,
    })
}

fn decode_v3(payload: &[u8]) -> Result<MsRecord> {
    let le = Endian::Little;
    if payload.len() < V3_HEADER_LEN {
        return Err(DecodeError::parse(format!(
            "record is {} bytes, shorter than the {}-byte fixed header",
            payload.len(),
            V3_HEADER_LEN
        )));
    }

    let nanosecond = le.u32(payload, 4)?;
    let year = le.u16(payload, 8)?;
    let doy = le.u16(payload, 10)?;
    let (hour, min, sec) = (payload[12], payload[13], payload[14]);
    let encoding = payload[15];
    let rate_field = le.f64(payload, 16)?;
    let sample_count = le.u32(payload, 24)? as usize;
    let expected_crc = le.u32(payload, V3_CRC_OFFSET)?;
    let sid_len = usize::from(payload[33]);
    let extra_len = usize::from(le.u16(payload, 34)?);
    let data_len = le.u32(payload, 36)? as usize;

    let record_length = V3_HEADER_LEN + sid_len + extra_len + data_len;
    if payload.len() < record_length {
        return Err(DecodeError::parse(format!(
            "record declares {} bytes, payload has {}",
            record_length,
            payload.len()
        )));
    }

    let mut crc = crc32c_update(0, &payload[..V3_CRC_OFFSET]);
    crc = crc32c_update(crc, &[0u8; 4]);
    crc = crc32c_update(crc, &payload[V3_CRC_OFFSET + 4..record_length]);
    if crc != expected_crc {
        return Err(DecodeError::Crc {
            expected: expected_crc,
            computed: crc,
        });
    }

    let sid_text = std::str::from_utf8(&payload[V3_HEADER_LEN..V3_HEADER_LEN + sid_len])
        .map_err(|_| DecodeError::parse("source identifier is not UTF-8"))?;
    let sid = SourceId::from(sid_text).map_err(|_| {
        DecodeError::Identifier(crate::error::FormatError::IdentifierTooLong {
            capacity: crate::sid::SID_CAPACITY,
        })
    })?;
    if !sid.starts_with(FDSN_PREFIX) {
        return Err(DecodeError::parse(format!("source identifier '{}' lacks FDSN: prefix", sid)));
    }
    let nslc = Nslc::from_sid(&sid)?;

    // Negative values are a sample period in seconds
    let sample_rate = if rate_field < 0.0 { -1.0 / rate_field } else { rate_field };
    let start_time_ns = epoch_ns(year, doy, hour, min, sec, i64::from(nanosecond))?;

    let samples = if sample_count == 0 {
        Samples::Int(Vec::new())
    } else {
        let enc = Encoding::from_code(encoding)?;
        let data_start = V3_HEADER_LEN + sid_len + extra_len;
        let data = &payload[data_start..record_length];
        let endian = match enc {
            Encoding::Steim1 | Encoding::Steim2 => Endian::Big,
            _ => Endian::Little,
        };
        unpack(enc, data, sample_count, endian)?
    };

    Ok(MsRecord {
        sid,
        nslc,
        format_version: 3,
        start_time_ns,
        sample_rate,
        encoding,
        sample_count,
        record_length,
        samples,
    })
}
