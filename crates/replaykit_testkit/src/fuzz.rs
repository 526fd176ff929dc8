//! Fuzz targets for log parsing.
//!
//! Each target accepts arbitrary bytes and must never panic. They can be
//! driven by cargo-fuzz or by the seeded loops in the tests below.

use replaykit_codec::LoggableType;
use replaykit_core::wpilog::record::{decode_value, encode_file_header, encode_value};
use replaykit_core::wpilog::{ControlRecord, LogFileReader, EXTRA_HEADER};
use replaykit_core::{LogReplaySource, LogTable, WpilogReader};
use replaykit_storage::InMemoryBackend;

const ALL_TYPES: [LoggableType; 11] = [
    LoggableType::Raw,
    LoggableType::Boolean,
    LoggableType::Integer,
    LoggableType::Float,
    LoggableType::Double,
    LoggableType::String,
    LoggableType::BooleanArray,
    LoggableType::IntegerArray,
    LoggableType::FloatArray,
    LoggableType::DoubleArray,
    LoggableType::StringArray,
];

/// Upper bound on cycles replayed per input.
const MAX_FUZZ_CYCLES: usize = 10_000;

/// Fuzz target for a whole log file.
pub fn fuzz_log_file(data: &[u8]) {
    let backend = InMemoryBackend::with_data(data.to_vec());
    if let Ok(reader) = LogFileReader::open(Box::new(backend)) {
        for item in reader.records() {
            let Ok((_, record)) = item else { break };
            if record.is_control() {
                let _ = record.as_control();
            }
        }
    }
}

/// Fuzz target for the record stream after a valid header.
///
/// Also replays the stream, which exercises cycle assembly on arbitrary
/// entry declarations.
pub fn fuzz_record_stream(data: &[u8]) {
    let Ok(mut log) = encode_file_header(EXTRA_HEADER) else {
        return;
    };
    log.extend_from_slice(data);
    fuzz_log_file(&log);

    let mut reader = WpilogReader::from_backend(Box::new(InMemoryBackend::with_data(log)));
    if reader.start().is_err() {
        return;
    }
    let table = LogTable::new(0);
    let mut cycles = 0;
    while cycles < MAX_FUZZ_CYCLES && reader.update_table(&table) {
        cycles += 1;
    }
    reader.end();
}

/// Fuzz target for control record payloads.
///
/// Anything that decodes must encode back to the bytes it was read from.
/// Trailing bytes after the last field are ignored by the decoder.
pub fn fuzz_control_payload(data: &[u8]) {
    if let Ok(control) = ControlRecord::decode_payload(data) {
        let encoded = control.encode_payload().expect("Decoded control must encode");
        assert!(
            data.starts_with(&encoded),
            "Control payload round trip mismatch"
        );
    }
}

/// Fuzz target for data payloads of every type.
///
/// Anything that decodes must encode back to an equal value.
pub fn fuzz_value_payload(data: &[u8]) {
    for ty in ALL_TYPES {
        if let Ok(value) = decode_value(ty, data) {
            assert_eq!(value.loggable_type(), ty);
            let encoded = encode_value(&value).expect("Decoded value must encode");
            let decoded = decode_value(ty, &encoded).expect("Encoded value must decode");
            assert_eq!(decoded, value, "Value round trip mismatch for {ty:?}");
        }
    }
}
