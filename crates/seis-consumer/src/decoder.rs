//! Message body -> channel metadata + samples

use tracing::debug;

use seis_mseed::{decode_record, DecodeError, Nslc, Samples, SourceId};

/// One record ready for loading
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub sid: SourceId,
    pub nslc: Nslc,
    /// Nanoseconds since the Unix epoch
    pub start_time_ns: i64,
    /// `None` when the record declares no rate (loaded as NULL)
    pub sample_rate: Option<f64>,
    pub samples: Samples,
}

impl DecodedRecord {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `start + idx * (1e9 / rate)` nanoseconds, `None` past the i64 range
    pub fn timestamp_ns(&self, idx: usize) -> Option<i64> {
        let Some(rate) = self.sample_rate else {
            return Some(self.start_time_ns);
        };
        let offset = idx as f64 * (1e9 / rate);
        if !offset.is_finite() || offset >= i64::MAX as f64 || offset < i64::MIN as f64 {
            return None;
        }
        self.start_time_ns.checked_add(offset as i64)
    }

    pub fn value(&self, idx: usize) -> Option<f64> {
        match &self.samples {
            Samples::Int(v) => v.get(idx).map(|&s| f64::from(s)),
            Samples::Float(v) => v.get(idx).map(|&s| f64::from(s)),
            Samples::Double(v) => v.get(idx).copied(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecordDecoder;

impl RecordDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Parse, CRC-check and unpack one miniSEED record
    pub fn decode(&self, body: &[u8]) -> Result<DecodedRecord, DecodeError> {
        let record = decode_record(body)?;

        // Catches NaN as well as non-positive rates
        let valid_rate = record.sample_rate > 0.0;
        if !record.samples.is_empty() && !valid_rate {
            return Err(DecodeError::InvalidSampleRate(record.sample_rate));
        }

        debug!(
            sid = %record.sid,
            version = record.format_version,
            samples = record.samples.len(),
            sample_type = record.samples.type_name(),
            rate = record.sample_rate,
            "Decoded record"
        );

        Ok(DecodedRecord {
            sid: record.sid,
            nslc: record.nslc,
            start_time_ns: record.start_time_ns,
            sample_rate: valid_rate.then_some(record.sample_rate),
            samples: record.samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ints, v3_record, v3_record_with_count, T0_NS};
    use seis_mseed::crc::crc32c;

    #[test]
    fn test_decode_int_record() {
        let rec = v3_record("FDSN:IU_COLA_00_B_H_Z", 3, 100.0, &ints(&[1, -2, 3]));
        let decoded = RecordDecoder::new().decode(&rec).unwrap();

        assert_eq!(decoded.nslc.net, "IU");
        assert_eq!(decoded.nslc.sta, "COLA");
        assert_eq!(decoded.nslc.loc, "00");
        assert_eq!(decoded.nslc.chan, "BHZ");
        assert_eq!(decoded.start_time_ns, T0_NS);
        assert_eq!(decoded.sample_rate, Some(100.0));
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.value(1), Some(-2.0));
        assert_eq!(decoded.value(3), None);
    }

    #[test]
    fn test_timestamps_spaced_by_rate() {
        let rec = v3_record("FDSN:IU_COLA_00_B_H_Z", 3, 100.0, &ints(&[0, 0, 0]));
        let decoded = RecordDecoder::new().decode(&rec).unwrap();

        assert_eq!(decoded.timestamp_ns(0), Some(T0_NS));
        assert_eq!(decoded.timestamp_ns(1), Some(T0_NS + 10_000_000));
        assert_eq!(decoded.timestamp_ns(2), Some(T0_NS + 20_000_000));
    }

    #[test]
    fn test_timestamp_past_range_is_none() {
        let rec = v3_record("FDSN:IU_COLA_00_B_H_Z", 3, 1e-12, &ints(&[0, 0]));
        let decoded = RecordDecoder::new().decode(&rec).unwrap();

        assert_eq!(decoded.timestamp_ns(0), Some(T0_NS));
        assert_eq!(decoded.timestamp_ns(1), None);
    }

    #[test]
    fn test_hostile_headers_are_parse_errors() {
        let steim = v3_record_with_count("FDSN:IU_COLA_00_B_H_Z", 10, 1.0, u32::MAX, &[0u8; 64]);
        assert!(matches!(
            RecordDecoder::new().decode(&steim),
            Err(DecodeError::Parse(_))
        ));

        let mut far_future = v3_record("FDSN:IU_COLA_00_B_H_Z", 3, 1.0, &ints(&[1]));
        far_future[8..10].copy_from_slice(&3000u16.to_le_bytes());
        far_future[28..32].fill(0);
        let crc = crc32c(&far_future);
        far_future[28..32].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            RecordDecoder::new().decode(&far_future),
            Err(DecodeError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_sample_rate() {
        let rec = v3_record("FDSN:IU_COLA_00_B_H_Z", 3, 0.0, &ints(&[5]));
        assert!(matches!(
            RecordDecoder::new().decode(&rec),
            Err(DecodeError::InvalidSampleRate(r)) if r == 0.0
        ));
    }

    #[test]
    fn test_zero_samples_without_rate() {
        let rec = v3_record("FDSN:IU_COLA_00_L_O_G", 0, 0.0, &[]);
        let decoded = RecordDecoder::new().decode(&rec).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.sample_rate, None);
    }

    #[test]
    fn test_text_encoding_unsupported() {
        let rec = v3_record_with_count("FDSN:IU_COLA_00_L_O_G", 0, 0.0, 8, b"log text");
        assert!(matches!(
            RecordDecoder::new().decode(&rec),
            Err(DecodeError::UnsupportedSampleType(0))
        ));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(RecordDecoder::new().decode(b"not a record").is_err());
    }
}
