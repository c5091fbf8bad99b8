//! Sample encodings and unpacking of the data section

use crate::error::{DecodeError, Result};
use crate::steim;

/// Data encoding codes shared by miniSEED 2 (blockette 1000) and 3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Text,
    Int16,
    Int32,
    Float32,
    Float64,
    Steim1,
    Steim2,
}

impl Encoding {
    /// Codes without a numeric mapping fail with `UnsupportedSampleType`
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Encoding::Text),
            1 => Ok(Encoding::Int16),
            3 => Ok(Encoding::Int32),
            4 => Ok(Encoding::Float32),
            5 => Ok(Encoding::Float64),
            10 => Ok(Encoding::Steim1),
            11 => Ok(Encoding::Steim2),
            other => Err(DecodeError::UnsupportedSampleType(other)),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Encoding::Text => 0,
            Encoding::Int16 => 1,
            Encoding::Int32 => 3,
            Encoding::Float32 => 4,
            Encoding::Float64 => 5,
            Encoding::Steim1 => 10,
            Encoding::Steim2 => 11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    pub(crate) fn u16(self, buf: &[u8], offset: usize) -> Result<u16> {
        let bytes: [u8; 2] = take(buf, offset)?;
        Ok(match self {
            Endian::Big => u16::from_be_bytes(bytes),
            Endian::Little => u16::from_le_bytes(bytes),
        })
    }

    pub(crate) fn i16(self, buf: &[u8], offset: usize) -> Result<i16> {
        self.u16(buf, offset).map(|v| v as i16)
    }

    pub(crate) fn u32(self, buf: &[u8], offset: usize) -> Result<u32> {
        let bytes: [u8; 4] = take(buf, offset)?;
        Ok(match self {
            Endian::Big => u32::from_be_bytes(bytes),
            Endian::Little => u32::from_le_bytes(bytes),
        })
    }

    pub(crate) fn i32(self, buf: &[u8], offset: usize) -> Result<i32> {
        self.u32(buf, offset).map(|v| v as i32)
    }

    pub(crate) fn f32(self, buf: &[u8], offset: usize) -> Result<f32> {
        self.u32(buf, offset).map(f32::from_bits)
    }

    pub(crate) fn f64(self, buf: &[u8], offset: usize) -> Result<f64> {
        let bytes: [u8; 8] = take(buf, offset)?;
        Ok(match self {
            Endian::Big => f64::from_be_bytes(bytes),
            Endian::Little => f64::from_le_bytes(bytes),
        })
    }
}

fn take<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N]> {
    buf.get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            DecodeError::parse(format!(
                "read of {} bytes at offset {} past end of {}-byte record",
                N,
                offset,
                buf.len()
            ))
        })
}

/// Decoded sample array in its native numeric type
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::Int(v) => v.len(),
            Samples::Float(v) => v.len(),
            Samples::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Samples::Int(_) => "int",
            Samples::Float(_) => "float",
            Samples::Double(_) => "double",
        }
    }
}

/// Unpack `count` samples from a data section
pub fn unpack(encoding: Encoding, data: &[u8], count: usize, endian: Endian) -> Result<Samples> {
    if count == 0 {
        return Ok(Samples::Int(Vec::new()));
    }

    let fixed = |width: usize| -> Result<()> {
        let needed = width.checked_mul(count).unwrap_or(usize::MAX);
        if data.len() < needed {
            return Err(DecodeError::parse(format!(
                "data section holds {} bytes, {} samples need {}",
                data.len(),
                count,
                needed
            )));
        }
        Ok(())
    };

    match encoding {
        Encoding::Text => Err(DecodeError::UnsupportedSampleType(encoding.code())),
        Encoding::Int16 => {
            fixed(2)?;
            (0..count)
                .map(|i| endian.i16(data, i * 2).map(i32::from))
                .collect::<Result<Vec<_>>>()
                .map(Samples::Int)
        }
        Encoding::Int32 => {
            fixed(4)?;
            (0..count)
                .map(|i| endian.i32(data, i * 4))
                .collect::<Result<Vec<_>>>()
                .map(Samples::Int)
        }
        Encoding::Float32 => {
            fixed(4)?;
            (0..count)
                .map(|i| endian.f32(data, i * 4))
                .collect::<Result<Vec<_>>>()
                .map(Samples::Float)
        }
        Encoding::Float64 => {
            fixed(8)?;
            (0..count)
                .map(|i| endian.f64(data, i * 8))
                .collect::<Result<Vec<_>>>()
                .map(Samples::Double)
        }
        Encoding::Steim1 => steim::decode(data, count, steim::Variant::Steim1).map(Samples::Int),
        Encoding::Steim2 => steim::decode(data, count, steim::Variant::Steim2).map(Samples::Int),
    }
}
