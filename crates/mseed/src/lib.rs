//! seis-mseed: miniSEED record codec
//!
//! Derives canonical stream identifiers from raw packet headers and
//! decodes miniSEED 2 and 3 records into channel metadata plus a typed
//! sample array. Supported encodings are INT16, INT32, FLOAT32, FLOAT64,
//! Steim-1 and Steim-2.

pub mod crc;
pub mod encoding;
pub mod error;
pub mod record;
pub mod sid;
mod steim;

pub use encoding::{Encoding, Samples};
pub use error::{DecodeError, FormatError};
pub use record::{decode_record, MsRecord};
pub use sid::{normalize, stream_identifier, Nslc, PayloadFormat, SourceId};
