//! WPILOG record layout and payload encoding.
//!
//! A file is a header followed by records:
//!
//! ```text
//! "WPILOG" | version u16 | extra header len u32 | extra header
//! record:  header byte | entry id (1-4) | payload size (1-4) | timestamp (1-8) | payload
//! ```
//!
//! The header byte stores `length - 1` of each variable-width field: bits
//! 0-1 for the entry id, 2-3 for the payload size and 4-6 for the timestamp.
//! All integers are little-endian. Entry 0 carries control records.

use crate::error::{CoreError, CoreResult};
use replaykit_codec::{LoggableType, Value};

/// Magic bytes at the start of every log.
pub const WPILOG_MAGIC: [u8; 6] = *b"WPILOG";

/// Format version written by this crate.
pub const WPILOG_VERSION: u16 = 0x0100;

/// Size of the fixed part of the file header.
/// magic (6) + version (2) + extra header length (4) = 12 bytes
pub const FILE_HEADER_SIZE: usize = 12;

/// Entry id reserved for control records.
pub const CONTROL_ENTRY: u32 = 0;

const CONTROL_START: u8 = 0;
const CONTROL_FINISH: u8 = 1;
const CONTROL_SET_METADATA: u8 = 2;

/// Encodes the file header.
///
/// # Errors
///
/// Returns an error if the extra header is longer than `u32::MAX` bytes.
pub fn encode_file_header(extra_header: &str) -> CoreResult<Vec<u8>> {
    let mut out = Vec::with_capacity(FILE_HEADER_SIZE + extra_header.len());
    out.extend_from_slice(&WPILOG_MAGIC);
    out.extend_from_slice(&WPILOG_VERSION.to_le_bytes());
    put_string(&mut out, extra_header)?;
    Ok(out)
}

/// Minimal number of little-endian bytes needed to hold `value`, at least 1.
fn byte_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

fn put_uint(out: &mut Vec<u8>, value: u64, len: usize) {
    out.extend_from_slice(&value.to_le_bytes()[..len]);
}

/// Reads a little-endian unsigned integer of up to 8 bytes.
pub(crate) fn read_uint(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Field lengths encoded in a record header byte: entry id, payload size,
/// timestamp.
#[must_use]
pub fn header_field_lengths(header: u8) -> (usize, usize, usize) {
    (
        usize::from(header & 0x3) + 1,
        usize::from((header >> 2) & 0x3) + 1,
        usize::from((header >> 4) & 0x7) + 1,
    )
}

fn to_u32(len: usize, what: &str) -> CoreResult<u32> {
    u32::try_from(len).map_err(|_| CoreError::invalid_operation(format!("{what} too large")))
}

fn put_string(out: &mut Vec<u8>, value: &str) -> CoreResult<()> {
    out.extend_from_slice(&to_u32(value.len(), "string")?.to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Cursor over a control or string array payload.
struct PayloadReader<'a> {
    bytes: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        if self.bytes.len() < len {
            return Err(CoreError::invalid_format(format!(
                "payload truncated: need {len} bytes, have {}",
                self.bytes.len()
            )));
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(head)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self) -> CoreResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::invalid_format("string is not valid UTF-8"))
    }
}

/// A record on entry 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRecord {
    /// Declares a new entry.
    Start {
        /// Entry id used by later data records.
        entry: u32,
        /// Entry name, such as `/RealOutputs/Arm/Angle`.
        name: String,
        /// WPILOG type string.
        type_string: String,
        /// JSON metadata.
        metadata: String,
    },
    /// Ends an entry.
    Finish {
        /// Entry id.
        entry: u32,
    },
    /// Replaces an entry's metadata.
    SetMetadata {
        /// Entry id.
        entry: u32,
        /// JSON metadata.
        metadata: String,
    },
}

impl ControlRecord {
    /// The entry this record refers to.
    #[must_use]
    pub fn entry(&self) -> u32 {
        match self {
            Self::Start { entry, .. } | Self::Finish { entry } | Self::SetMetadata { entry, .. } => {
                *entry
            }
        }
    }

    /// Encodes the record payload.
    ///
    /// # Errors
    ///
    /// Returns an error if a string is longer than `u32::MAX` bytes.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::Start {
                entry,
                name,
                type_string,
                metadata,
            } => {
                out.push(CONTROL_START);
                out.extend_from_slice(&entry.to_le_bytes());
                put_string(&mut out, name)?;
                put_string(&mut out, type_string)?;
                put_string(&mut out, metadata)?;
            }
            Self::Finish { entry } => {
                out.push(CONTROL_FINISH);
                out.extend_from_slice(&entry.to_le_bytes());
            }
            Self::SetMetadata { entry, metadata } => {
                out.push(CONTROL_SET_METADATA);
                out.extend_from_slice(&entry.to_le_bytes());
                put_string(&mut out, metadata)?;
            }
        }
        Ok(out)
    }

    /// Decodes a control payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is truncated, has an unknown control
    /// type or holds invalid UTF-8.
    pub fn decode_payload(payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader { bytes: payload };
        let record = match reader.u8()? {
            CONTROL_START => Self::Start {
                entry: reader.u32()?,
                name: reader.string()?,
                type_string: reader.string()?,
                metadata: reader.string()?,
            },
            CONTROL_FINISH => Self::Finish {
                entry: reader.u32()?,
            },
            CONTROL_SET_METADATA => Self::SetMetadata {
                entry: reader.u32()?,
                metadata: reader.string()?,
            },
            other => {
                return Err(CoreError::invalid_format(format!(
                    "unknown control record type {other}"
                )))
            }
        };
        Ok(record)
    }
}

/// One record of a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WpilogRecord {
    /// Entry id; [`CONTROL_ENTRY`] for control records.
    pub entry: u32,
    /// Timestamp in microseconds.
    pub timestamp: i64,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl WpilogRecord {
    /// Creates a control record.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub fn control(record: &ControlRecord, timestamp: i64) -> CoreResult<Self> {
        Ok(Self {
            entry: CONTROL_ENTRY,
            timestamp,
            payload: record.encode_payload()?,
        })
    }

    /// Creates a data record.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    pub fn data(entry: u32, timestamp: i64, value: &Value) -> CoreResult<Self> {
        Ok(Self {
            entry,
            timestamp,
            payload: encode_value(value)?,
        })
    }

    /// True for records on entry 0.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.entry == CONTROL_ENTRY
    }

    /// Decodes this record as a control record.
    ///
    /// # Errors
    ///
    /// Returns an error if this is not a valid control record.
    pub fn as_control(&self) -> CoreResult<ControlRecord> {
        if !self.is_control() {
            return Err(CoreError::invalid_format(format!(
                "entry {} is not a control entry",
                self.entry
            )));
        }
        ControlRecord::decode_payload(&self.payload)
    }

    /// Decodes the payload as a value of type `ty`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not hold a `ty` value.
    pub fn value(&self, ty: LoggableType) -> CoreResult<Value> {
        decode_value(ty, &self.payload)
    }

    /// Appends the encoded record to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is longer than `u32::MAX` bytes.
    pub fn encode(&self, out: &mut Vec<u8>) -> CoreResult<()> {
        let size = u64::from(to_u32(self.payload.len(), "record payload")?);
        let entry = u64::from(self.entry);
        // Timestamps are stored as the unsigned bit pattern.
        #[allow(clippy::cast_sign_loss)]
        let timestamp = self.timestamp as u64;

        let entry_len = byte_len(entry);
        let size_len = byte_len(size);
        let timestamp_len = byte_len(timestamp);

        #[allow(clippy::cast_possible_truncation)]
        let header = ((entry_len - 1) | ((size_len - 1) << 2) | ((timestamp_len - 1) << 4)) as u8;
        out.reserve(1 + entry_len + size_len + timestamp_len + self.payload.len());
        out.push(header);
        put_uint(out, entry, entry_len);
        put_uint(out, size, size_len);
        put_uint(out, timestamp, timestamp_len);
        out.extend_from_slice(&self.payload);
        Ok(())
    }
}

/// Encodes a value as a data payload.
///
/// # Errors
///
/// Returns an error if a string array has more than `u32::MAX` elements or
/// an element is too long.
pub fn encode_value(value: &Value) -> CoreResult<Vec<u8>> {
    let out = match value {
        Value::Raw(bytes) => bytes.clone(),
        Value::Boolean(v) => vec![u8::from(*v)],
        Value::Integer(v) => v.to_le_bytes().to_vec(),
        Value::Float(v) => v.to_le_bytes().to_vec(),
        Value::Double(v) => v.to_le_bytes().to_vec(),
        Value::String(v) => v.as_bytes().to_vec(),
        Value::BooleanArray(values) => values.iter().map(|v| u8::from(*v)).collect(),
        Value::IntegerArray(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        Value::FloatArray(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        Value::DoubleArray(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        Value::StringArray(values) => {
            let mut out = Vec::new();
            out.extend_from_slice(&to_u32(values.len(), "string array")?.to_le_bytes());
            for v in values {
                put_string(&mut out, v)?;
            }
            out
        }
    };
    Ok(out)
}

fn fixed<const N: usize>(payload: &[u8], ty: LoggableType) -> CoreResult<[u8; N]> {
    payload.try_into().map_err(|_| {
        CoreError::invalid_format(format!(
            "{ty} payload must be {N} bytes, got {}",
            payload.len()
        ))
    })
}

fn chunks<const N: usize>(payload: &[u8], ty: LoggableType) -> CoreResult<Vec<[u8; N]>> {
    if payload.len() % N != 0 {
        return Err(CoreError::invalid_format(format!(
            "{ty} payload length {} is not a multiple of {N}",
            payload.len()
        )));
    }
    payload
        .chunks_exact(N)
        .map(|chunk| fixed::<N>(chunk, ty))
        .collect()
}

/// Decodes a data payload as a value of type `ty`.
///
/// # Errors
///
/// Returns an error if the payload length does not fit the type or a
/// string is not valid UTF-8.
pub fn decode_value(ty: LoggableType, payload: &[u8]) -> CoreResult<Value> {
    let value = match ty {
        LoggableType::Raw => Value::Raw(payload.to_vec()),
        LoggableType::Boolean => Value::Boolean(fixed::<1>(payload, ty)?[0] != 0),
        LoggableType::Integer => Value::Integer(i64::from_le_bytes(fixed(payload, ty)?)),
        LoggableType::Float => Value::Float(f32::from_le_bytes(fixed(payload, ty)?)),
        LoggableType::Double => Value::Double(f64::from_le_bytes(fixed(payload, ty)?)),
        LoggableType::String => Value::String(
            String::from_utf8(payload.to_vec())
                .map_err(|_| CoreError::invalid_format("string is not valid UTF-8"))?,
        ),
        LoggableType::BooleanArray => Value::BooleanArray(payload.iter().map(|b| *b != 0).collect()),
        LoggableType::IntegerArray => Value::IntegerArray(
            chunks(payload, ty)?.into_iter().map(i64::from_le_bytes).collect(),
        ),
        LoggableType::FloatArray => Value::FloatArray(
            chunks(payload, ty)?.into_iter().map(f32::from_le_bytes).collect(),
        ),
        LoggableType::DoubleArray => Value::DoubleArray(
            chunks(payload, ty)?.into_iter().map(f64::from_le_bytes).collect(),
        ),
        LoggableType::StringArray => {
            let mut reader = PayloadReader { bytes: payload };
            let count = reader.u32()? as usize;
            let mut values = Vec::with_capacity(count.min(payload.len() / 4));
            for _ in 0..count {
                values.push(reader.string()?);
            }
            Value::StringArray(values)
        }
    };
    Ok(value)
}
