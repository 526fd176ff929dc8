//! RLOG revision 2 encoding.
//!
//! A stream starts with the revision byte and then carries one cycle per
//! frame: a timestamp record followed by records for every field that is
//! new or changed since the previous cycle. All integers are big-endian.
//!
//! | Record | Layout |
//! |---|---|
//! | timestamp | `0`, f64 seconds |
//! | key | `1`, u16 id, u16 length + name, u16 length + type string |
//! | value | `2`, u16 id, u16 length + payload |
//!
//! On the socket every frame is prefixed with its u32 length. An empty
//! frame is a keep-alive.

use crate::error::{CoreError, CoreResult};
use crate::table::LogTable;
use crate::wpilog::keeps_custom_type;
use bytes::{Buf, BufMut};
use replaykit_codec::{LogValue, LoggableType, Value};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read};
use std::sync::Arc;

/// Revision byte at the start of every stream.
pub const RLOG_REVISION: u8 = 2;

const TIMESTAMP_RECORD: u8 = 0;
const KEY_RECORD: u8 = 1;
const VALUE_RECORD: u8 = 2;

fn to_u16(len: usize, what: &str) -> CoreResult<u16> {
    u16::try_from(len)
        .map_err(|_| CoreError::invalid_operation(format!("{what} too long for RLOG: {len} bytes")))
}

fn to_i32(len: usize, what: &str) -> CoreResult<i32> {
    i32::try_from(len)
        .map_err(|_| CoreError::invalid_operation(format!("{what} too long for RLOG: {len}")))
}

#[allow(clippy::cast_precision_loss)]
fn put_timestamp(out: &mut Vec<u8>, micros: i64) {
    out.put_u8(TIMESTAMP_RECORD);
    out.put_f64(micros as f64 / 1_000_000.0);
}

fn put_key(out: &mut Vec<u8>, id: u16, name: &str, type_string: &str) -> CoreResult<()> {
    let name_len = to_u16(name.len(), "key")?;
    let type_len = to_u16(type_string.len(), "type string")?;
    out.put_u8(KEY_RECORD);
    out.put_u16(id);
    out.put_u16(name_len);
    out.put_slice(name.as_bytes());
    out.put_u16(type_len);
    out.put_slice(type_string.as_bytes());
    Ok(())
}

fn value_record(id: u16, value: &Value) -> CoreResult<Vec<u8>> {
    let payload = encode_payload(value)?;
    let mut out = Vec::with_capacity(5 + payload.len());
    out.put_u8(VALUE_RECORD);
    out.put_u16(id);
    out.put_u16(to_u16(payload.len(), "value")?);
    out.put_slice(&payload);
    Ok(out)
}

fn encode_payload(value: &Value) -> CoreResult<Vec<u8>> {
    let mut out = Vec::new();
    match value {
        Value::Raw(bytes) => out.put_slice(bytes),
        Value::Boolean(v) => out.put_u8(u8::from(*v)),
        Value::Integer(v) => out.put_i64(*v),
        Value::Float(v) => out.put_f32(*v),
        Value::Double(v) => out.put_f64(*v),
        Value::String(v) => out.put_slice(v.as_bytes()),
        Value::BooleanArray(values) => values.iter().for_each(|v| out.put_u8(u8::from(*v))),
        Value::IntegerArray(values) => values.iter().for_each(|v| out.put_i64(*v)),
        Value::FloatArray(values) => values.iter().for_each(|v| out.put_f32(*v)),
        Value::DoubleArray(values) => values.iter().for_each(|v| out.put_f64(*v)),
        Value::StringArray(values) => {
            out.put_i32(to_i32(values.len(), "string array")?);
            for v in values {
                out.put_i32(to_i32(v.len(), "string")?);
                out.put_slice(v.as_bytes());
            }
        }
    }
    Ok(out)
}

/// Wraps `data` in a length-prefixed frame.
///
/// # Errors
///
/// Returns an error if `data` is longer than `u32::MAX` bytes.
pub fn encode_frame(data: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(data.len())
        .map_err(|_| CoreError::invalid_operation("RLOG frame longer than u32::MAX"))?;
    let mut out = Vec::with_capacity(4 + data.len());
    out.put_u32(len);
    out.put_slice(data);
    Ok(out)
}

/// Reads one length-prefixed frame.
///
/// Returns `None` if the stream ended cleanly before the next frame.
///
/// # Errors
///
/// Returns an error if the stream fails or ends inside a frame.
pub fn read_frame(reader: &mut impl Read) -> CoreResult<Option<Vec<u8>>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let mut data = vec![0u8; u32::from_be_bytes(len) as usize];
    reader.read_exact(&mut data)?;
    Ok(Some(data))
}

/// Turns snapshots into RLOG cycles.
///
/// Keys get ids in the order they first appear. The encoder remembers the
/// last table so it can send only changed fields, and so a client that
/// joins late can be brought up to date with [`newcomer_data`].
///
/// [`newcomer_data`]: RlogEncoder::newcomer_data
#[derive(Debug, Default)]
pub struct RlogEncoder {
    key_ids: HashMap<String, u16>,
    key_records: Vec<u8>,
    last: BTreeMap<String, Arc<LogValue>>,
    last_timestamp: i64,
    wrote_revision: bool,
}

impl RlogEncoder {
    /// Creates an encoder with no keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys assigned so far.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.key_ids.len()
    }

    /// Encodes one cycle. The revision byte is prepended the first time
    /// `include_revision` is set.
    ///
    /// A field that cannot be encoded is skipped with a warning.
    pub fn encode_table(&mut self, table: &LogTable, include_revision: bool) -> Vec<u8> {
        let mut out = Vec::new();
        if include_revision && !self.wrote_revision {
            out.put_u8(RLOG_REVISION);
            self.wrote_revision = true;
        }
        put_timestamp(&mut out, table.timestamp());

        let fields = table.get_all(false);
        for (key, value) in &fields {
            if self.last.get(key).is_some_and(|previous| previous == value) {
                continue;
            }
            match self.encode_field(key, value) {
                Ok(record) => out.extend_from_slice(&record),
                Err(err) => tracing::warn!(key = %key, error = %err, "RLOG field skipped"),
            }
        }

        self.last = fields;
        self.last_timestamp = table.timestamp();
        out
    }

    fn encode_field(&mut self, key: &str, value: &LogValue) -> CoreResult<Vec<u8>> {
        if let Some(id) = self.key_ids.get(key) {
            return value_record(*id, value.value());
        }
        let id = u16::try_from(self.key_ids.len())
            .map_err(|_| CoreError::invalid_operation("RLOG key ids exhausted"))?;
        let mut key_record = Vec::new();
        put_key(&mut key_record, id, key, value.wpilog_type())?;
        let mut out = key_record.clone();
        out.extend_from_slice(&value_record(id, value.value())?);

        self.key_records.extend_from_slice(&key_record);
        self.key_ids.insert(key.to_string(), id);
        Ok(out)
    }

    /// Everything a new client needs: the revision, the last timestamp,
    /// every key and every field of the last table.
    #[must_use]
    pub fn newcomer_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.key_records.len());
        out.put_u8(RLOG_REVISION);
        put_timestamp(&mut out, self.last_timestamp);
        out.extend_from_slice(&self.key_records);
        for (key, value) in &self.last {
            let Some(id) = self.key_ids.get(key) else {
                continue;
            };
            if let Ok(record) = value_record(*id, value.value()) {
                out.extend_from_slice(&record);
            }
        }
        out
    }
}

#[derive(Debug)]
struct DecodedKey {
    name: String,
    loggable_type: LoggableType,
    custom_type: Option<String>,
}

/// Applies RLOG frames to a table.
///
/// Fields persist in the table between frames, so a client sees the full
/// state after every cycle even though only changes are sent.
#[derive(Debug, Default)]
pub struct RlogDecoder {
    keys: HashMap<u16, DecodedKey>,
    revision_checked: bool,
}

fn take<'a>(data: &mut &'a [u8], len: usize) -> CoreResult<&'a [u8]> {
    if data.len() < len {
        return Err(CoreError::invalid_format(format!(
            "RLOG record needs {len} bytes, {} left",
            data.len()
        )));
    }
    let (head, tail) = data.split_at(len);
    *data = tail;
    Ok(head)
}

fn read_u16(data: &mut &[u8]) -> CoreResult<u16> {
    let mut bytes = take(data, 2)?;
    Ok(bytes.get_u16())
}

fn read_string(data: &mut &[u8]) -> CoreResult<String> {
    let len = read_u16(data)? as usize;
    String::from_utf8(take(data, len)?.to_vec())
        .map_err(|_| CoreError::invalid_format("RLOG string is not valid UTF-8"))
}

fn fixed_chunks(payload: &[u8], size: usize, ty: LoggableType) -> CoreResult<std::slice::ChunksExact<'_, u8>> {
    if payload.len() % size != 0 {
        return Err(CoreError::invalid_format(format!(
            "{ty} payload length {} is not a multiple of {size}",
            payload.len()
        )));
    }
    Ok(payload.chunks_exact(size))
}

fn exact(payload: &[u8], size: usize, ty: LoggableType) -> CoreResult<&[u8]> {
    if payload.len() == size {
        Ok(payload)
    } else {
        Err(CoreError::invalid_format(format!(
            "{ty} payload must be {size} bytes, got {}",
            payload.len()
        )))
    }
}

fn decode_payload(ty: LoggableType, payload: &[u8]) -> CoreResult<Value> {
    let value = match ty {
        LoggableType::Raw => Value::Raw(payload.to_vec()),
        LoggableType::Boolean => Value::Boolean(exact(payload, 1, ty)?[0] != 0),
        LoggableType::Integer => Value::Integer(exact(payload, 8, ty)?.get_i64()),
        LoggableType::Float => Value::Float(exact(payload, 4, ty)?.get_f32()),
        LoggableType::Double => Value::Double(exact(payload, 8, ty)?.get_f64()),
        LoggableType::String => Value::String(
            String::from_utf8(payload.to_vec())
                .map_err(|_| CoreError::invalid_format("RLOG string is not valid UTF-8"))?,
        ),
        LoggableType::BooleanArray => Value::BooleanArray(payload.iter().map(|b| *b != 0).collect()),
        LoggableType::IntegerArray => Value::IntegerArray(
            fixed_chunks(payload, 8, ty)?.map(|mut c| c.get_i64()).collect(),
        ),
        LoggableType::FloatArray => Value::FloatArray(
            fixed_chunks(payload, 4, ty)?.map(|mut c| c.get_f32()).collect(),
        ),
        LoggableType::DoubleArray => Value::DoubleArray(
            fixed_chunks(payload, 8, ty)?.map(|mut c| c.get_f64()).collect(),
        ),
        LoggableType::StringArray => {
            let mut data = payload;
            let count = take(&mut data, 4)?.get_i32();
            let count = usize::try_from(count)
                .map_err(|_| CoreError::invalid_format("negative RLOG string array length"))?;
            let mut values = Vec::with_capacity(count.min(payload.len() / 4));
            for _ in 0..count {
                let len = usize::try_from(take(&mut data, 4)?.get_i32())
                    .map_err(|_| CoreError::invalid_format("negative RLOG string length"))?;
                let bytes = take(&mut data, len)?;
                values.push(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|_| CoreError::invalid_format("RLOG string is not valid UTF-8"))?,
                );
            }
            Value::StringArray(values)
        }
    };
    Ok(value)
}

impl RlogDecoder {
    /// Creates a decoder that expects the revision byte first.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one frame to `table`. Empty frames are keep-alives.
    ///
    /// # Errors
    ///
    /// Returns an error on an unsupported revision, an unknown record
    /// type, a value for an unknown key, or a truncated record.
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode_into(&mut self, mut data: &[u8], table: &LogTable) -> CoreResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if !self.revision_checked {
            let revision = take(&mut data, 1)?[0];
            if revision != RLOG_REVISION {
                return Err(CoreError::invalid_format(format!(
                    "unsupported RLOG revision {revision}"
                )));
            }
            self.revision_checked = true;
        }

        while !data.is_empty() {
            match take(&mut data, 1)?[0] {
                TIMESTAMP_RECORD => {
                    let seconds = take(&mut data, 8)?.get_f64();
                    table.set_timestamp((seconds * 1_000_000.0).round() as i64);
                }
                KEY_RECORD => {
                    let id = read_u16(&mut data)?;
                    let name = read_string(&mut data)?;
                    let type_string = read_string(&mut data)?;
                    let custom_type = keeps_custom_type(&type_string).then(|| type_string.clone());
                    self.keys.insert(
                        id,
                        DecodedKey {
                            name: name.strip_prefix('/').unwrap_or(&name).to_string(),
                            loggable_type: LoggableType::from_wpilog_type(&type_string),
                            custom_type,
                        },
                    );
                }
                VALUE_RECORD => {
                    let id = read_u16(&mut data)?;
                    let len = read_u16(&mut data)? as usize;
                    let payload = take(&mut data, len)?;
                    let key = self.keys.get(&id).ok_or_else(|| {
                        CoreError::invalid_format(format!("RLOG value for unknown key id {id}"))
                    })?;
                    let value = LogValue::new(decode_payload(key.loggable_type, payload)?);
                    let value = match &key.custom_type {
                        Some(custom_type) => value.with_custom_type(custom_type.clone()),
                        None => value,
                    };
                    table.put_value(&key.name, value);
                }
                other => {
                    return Err(CoreError::invalid_format(format!(
                        "unknown RLOG record type {other}"
                    )))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(frames: &[Vec<u8>]) -> LogTable {
        let table = LogTable::new(0);
        let mut decoder = RlogDecoder::new();
        for frame in frames {
            decoder.decode_into(frame, &table).unwrap();
        }
        table
    }

    #[test]
    fn first_cycle_layout() {
        let table = LogTable::new(1_500_000);
        table.put("Flag", &true);
        let data = RlogEncoder::new().encode_table(&table, true);

        let mut expected = vec![RLOG_REVISION, TIMESTAMP_RECORD];
        expected.extend_from_slice(&1.5f64.to_be_bytes());
        expected.extend_from_slice(&[KEY_RECORD, 0, 0, 0, 5]);
        expected.extend_from_slice(b"/Flag");
        expected.extend_from_slice(&[0, 7]);
        expected.extend_from_slice(b"boolean");
        expected.extend_from_slice(&[VALUE_RECORD, 0, 0, 0, 1, 1]);
        assert_eq!(data, expected);
    }

    #[test]
    fn unchanged_fields_are_not_resent() {
        let mut encoder = RlogEncoder::new();
        let table = LogTable::new(0);
        table.put("A", &1i64);
        table.put("B", "x");
        let first = encoder.encode_table(&table.snapshot(), false);
        assert!(first.len() > 9);

        table.set_timestamp(20_000);
        let second = encoder.encode_table(&table.snapshot(), false);
        assert_eq!(second.len(), 9);

        table.set_timestamp(40_000);
        table.put("A", &2i64);
        let third = encoder.encode_table(&table.snapshot(), false);
        // Timestamp plus one value record: 1 + 2 + 2 + 8 bytes.
        assert_eq!(third.len(), 9 + 13);
        assert_eq!(encoder.key_count(), 2);
    }

    #[test]
    fn every_kind_round_trips() {
        let table = LogTable::new(123_456);
        table.put("Raw", &[1u8, 2, 3][..]);
        table.put("Bool", &true);
        table.put("Int", &-7i64);
        table.put("Float", &1.25f32);
        table.put("Double", &-2.5f64);
        table.put("String", "hello");
        table.put("Bools", &[true, false]);
        table.put("Ints", &[1i64, -1]);
        table.put("Floats", &[0.5f32]);
        table.put("Doubles", &[3.0f64, 4.0]);
        table.put("Strings", &["a", "bc"]);
        table.put_value("Pose", LogValue::new(vec![9u8; 4]).with_custom_type("struct:Pose"));

        let mut encoder = RlogEncoder::new();
        let frame = encoder.encode_table(&table, true);
        let replayed = decoded(&[frame]);

        assert_eq!(replayed.timestamp(), 123_456);
        assert_eq!(replayed.get_all(false), table.get_all(false));
    }

    #[test]
    fn newcomer_sees_full_state() {
        let mut encoder = RlogEncoder::new();
        let table = LogTable::new(20_000);
        table.put("A", &1i64);
        table.put("B", "x");
        encoder.encode_table(&table.snapshot(), false);
        table.set_timestamp(40_000);
        table.put("A", &2i64);
        encoder.encode_table(&table.snapshot(), false);

        let replayed = decoded(&[encoder.newcomer_data()]);
        assert_eq!(replayed.timestamp(), 40_000);
        assert_eq!(replayed.get("A", 0i64), 2);
        assert_eq!(replayed.get("B", String::new()), "x");
    }

    #[test]
    fn deltas_accumulate_on_client() {
        let mut encoder = RlogEncoder::new();
        let mut frames = vec![encoder.newcomer_data()];
        let table = LogTable::new(20_000);
        table.put("A", &1i64);
        table.put("B", "x");
        frames.push(encoder.encode_table(&table.snapshot(), false));
        table.set_timestamp(40_000);
        table.put("A", &5i64);
        frames.push(encoder.encode_table(&table.snapshot(), false));

        let replayed = decoded(&frames);
        assert_eq!(replayed.timestamp(), 40_000);
        assert_eq!(replayed.get("A", 0i64), 5);
        assert_eq!(replayed.get("B", String::new()), "x");
    }

    #[test]
    fn oversized_value_is_skipped() {
        let mut encoder = RlogEncoder::new();
        let table = LogTable::new(0);
        table.put("Big", &vec![0u8; 70_000]);
        table.put("Small", &1i64);
        let replayed = decoded(&[encoder.encode_table(&table, true)]);
        assert!(!replayed.contains("Big"));
        assert_eq!(replayed.get("Small", 0i64), 1);
    }

    #[test]
    fn bad_streams_are_errors() {
        let table = LogTable::new(0);
        assert!(RlogDecoder::new().decode_into(&[1], &table).is_err());
        // Value for a key that was never declared.
        assert!(RlogDecoder::new()
            .decode_into(&[RLOG_REVISION, VALUE_RECORD, 0, 3, 0, 0], &table)
            .is_err());
        // Truncated timestamp.
        assert!(RlogDecoder::new()
            .decode_into(&[RLOG_REVISION, TIMESTAMP_RECORD, 0, 0], &table)
            .is_err());
        assert!(RlogDecoder::new().decode_into(&[], &table).is_ok());
    }

    #[test]
    fn frames_are_length_prefixed() {
        let frame = encode_frame(b"abc").unwrap();
        assert_eq!(frame, vec![0, 0, 0, 3, b'a', b'b', b'c']);

        let mut stream = frame.as_slice();
        assert_eq!(read_frame(&mut stream).unwrap(), Some(b"abc".to_vec()));
        assert_eq!(read_frame(&mut stream).unwrap(), None);

        let mut truncated: &[u8] = &[0, 0, 0, 5, 1];
        assert!(read_frame(&mut truncated).is_err());
    }
}
