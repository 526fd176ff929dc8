//! WPILOG byte vectors.
//!
//! Each vector pins the exact bytes of a header or record so that other
//! log tools can be checked against the same data.

use serde::{Deserialize, Serialize};

/// A byte-level test vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Input bytes (hex-encoded).
    pub input_hex: String,
    /// Expected encoding (hex-encoded); empty for error vectors.
    pub expected_hex: String,
    /// Expected error message fragment, if reading the input should fail.
    pub expected_error: Option<String>,
}

impl TestVector {
    fn encoding(id: &str, description: &str, hex: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_hex: hex.into(),
            expected_hex: hex.into(),
            expected_error: None,
        }
    }

    fn failure(id: &str, description: &str, input_hex: &str, error: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_hex: input_hex.into(),
            expected_hex: String::new(),
            expected_error: Some(error.into()),
        }
    }
}

/// File header vectors.
pub fn header_vectors() -> Vec<TestVector> {
    vec![
        TestVector::encoding(
            "header_advantagekit",
            "Version 1.0 header with the AdvantageKit extra header",
            "5750494c4f4700010c000000416476616e746167654b6974",
        ),
        TestVector::encoding(
            "header_empty_extra",
            "Version 1.0 header with no extra header",
            "5750494c4f470001 00000000",
        ),
        TestVector::failure(
            "header_too_short",
            "Magic only",
            "5750494c4f47",
            "file too short",
        ),
        TestVector::failure(
            "header_bad_magic",
            "Wrong last magic byte",
            "5750494c4f580001 00000000",
            "missing WPILOG magic",
        ),
        TestVector::failure(
            "header_old_version",
            "Version 0.0",
            "5750494c4f470000 00000000",
            "unsupported WPILOG version 0.0",
        ),
        TestVector::failure(
            "header_extra_past_end",
            "Extra header length larger than the file",
            "5750494c4f470001 05000000 41",
            "extra header extends past end of file",
        ),
    ]
}

/// Control record vectors.
pub fn control_record_vectors() -> Vec<TestVector> {
    vec![
        TestVector::encoding(
            "control_start_timestamp",
            "Start of entry 1 /Timestamp int64 with source metadata at t=0",
            "0000390000010000000a0000002f54696d657374616d7005000000696e743634\
             190000007b22736f75726365223a22416476616e746167654b6974227d",
        ),
        TestVector::encoding(
            "control_finish",
            "Finish of entry 5 at t=7",
            "000005070105000000",
        ),
        TestVector::encoding(
            "control_set_metadata_unit",
            "Metadata of entry 4 with unit m at t=40000",
            "10002d409c0204000000240000007b22736f75726365223a22416476616e74616765\
             4b6974222c22756e6974223a226d227d",
        ),
    ]
}

/// Data record vectors.
pub fn data_record_vectors() -> Vec<TestVector> {
    vec![
        TestVector::encoding(
            "data_boolean",
            "true on entry 2 at t=20000 (two byte timestamp)",
            "100201204e01",
        ),
        TestVector::encoding(
            "data_double",
            "1.5 on entry 3 at t=1",
            "00030801000000000000f83f",
        ),
        TestVector::encoding(
            "data_int64_negative",
            "-2 on entry 1 at t=0",
            "00010800feffffffffffffff",
        ),
        TestVector::encoding(
            "data_float_array",
            "[0.5, -2.0] on entry 6 at t=0",
            "000608000000003f000000c0",
        ),
        TestVector::encoding(
            "data_string_array",
            "[\"a\", \"bc\"] on entry 300 at t=2^24 (two byte entry, four byte timestamp)",
            "312c010f00000001020000000100000061020000006263",
        ),
    ]
}

/// All vectors as a JSON document.
pub fn all_vectors_json() -> String {
    #[derive(Serialize)]
    struct AllVectors {
        header: Vec<TestVector>,
        control: Vec<TestVector>,
        data: Vec<TestVector>,
    }

    let all = AllVectors {
        header: header_vectors(),
        control: control_record_vectors(),
        data: data_record_vectors(),
    };

    serde_json::to_string_pretty(&all).expect("Failed to serialize vectors")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::golden::{hex_decode, hex_encode};
    use replaykit_codec::Value;
    use replaykit_core::wpilog::record::encode_file_header;
    use replaykit_core::wpilog::{entry_metadata, ControlRecord, LogFileReader, WpilogRecord};
    use replaykit_storage::InMemoryBackend;

    fn vector<'a>(vectors: &'a [TestVector], id: &str) -> &'a TestVector {
        vectors
            .iter()
            .find(|v| v.id == id)
            .unwrap_or_else(|| panic!("no vector {id}"))
    }

    fn encode(record: &WpilogRecord) -> String {
        let mut out = Vec::new();
        record.encode(&mut out).unwrap();
        hex_encode(&out)
    }

    fn expected(v: &TestVector) -> String {
        hex_encode(&hex_decode(&v.expected_hex))
    }

    #[test]
    fn header_encoding_matches() {
        let vectors = header_vectors();
        assert_eq!(
            hex_encode(&encode_file_header("AdvantageKit").unwrap()),
            expected(vector(&vectors, "header_advantagekit"))
        );
        assert_eq!(
            hex_encode(&encode_file_header("").unwrap()),
            expected(vector(&vectors, "header_empty_extra"))
        );
    }

    #[test]
    fn header_errors_match() {
        for v in header_vectors() {
            let backend = InMemoryBackend::with_data(hex_decode(&v.input_hex));
            let result = LogFileReader::open(Box::new(backend));
            match &v.expected_error {
                Some(fragment) => {
                    let err = result.err().unwrap_or_else(|| panic!("{} should fail", v.id));
                    assert!(
                        err.to_string().contains(fragment),
                        "{}: {err} does not mention {fragment}",
                        v.id
                    );
                }
                None => assert!(result.is_ok(), "{} should open", v.id),
            }
        }
    }

    #[test]
    fn control_encoding_matches() {
        let vectors = control_record_vectors();

        let start = ControlRecord::Start {
            entry: 1,
            name: "/Timestamp".into(),
            type_string: "int64".into(),
            metadata: entry_metadata(None),
        };
        assert_eq!(
            encode(&WpilogRecord::control(&start, 0).unwrap()),
            expected(vector(&vectors, "control_start_timestamp"))
        );

        let finish = ControlRecord::Finish { entry: 5 };
        assert_eq!(
            encode(&WpilogRecord::control(&finish, 7).unwrap()),
            expected(vector(&vectors, "control_finish"))
        );

        let metadata = ControlRecord::SetMetadata {
            entry: 4,
            metadata: entry_metadata(Some("m")),
        };
        assert_eq!(
            encode(&WpilogRecord::control(&metadata, 40_000).unwrap()),
            expected(vector(&vectors, "control_set_metadata_unit"))
        );
    }

    #[test]
    fn data_encoding_matches() {
        let vectors = data_record_vectors();
        let cases = [
            ("data_boolean", 2, 20_000, Value::Boolean(true)),
            ("data_double", 3, 1, Value::Double(1.5)),
            ("data_int64_negative", 1, 0, Value::Integer(-2)),
            ("data_float_array", 6, 0, Value::FloatArray(vec![0.5, -2.0])),
            (
                "data_string_array",
                300,
                0x0100_0000,
                Value::StringArray(vec!["a".into(), "bc".into()]),
            ),
        ];
        for (id, entry, timestamp, value) in cases {
            let record = WpilogRecord::data(entry, timestamp, &value).unwrap();
            assert_eq!(encode(&record), expected(vector(&vectors, id)), "{id}");
        }
    }

    #[test]
    fn records_decode_from_vectors() {
        let mut log = encode_file_header("AdvantageKit").unwrap();
        for v in control_record_vectors().iter().chain(&data_record_vectors()) {
            log.extend(hex_decode(&v.input_hex));
        }
        let reader = LogFileReader::open(Box::new(InMemoryBackend::with_data(log))).unwrap();
        let records: Vec<_> = reader.records().map(|r| r.unwrap().1).collect();
        assert_eq!(records.len(), 8);

        assert_eq!(
            records[0].as_control().unwrap(),
            ControlRecord::Start {
                entry: 1,
                name: "/Timestamp".into(),
                type_string: "int64".into(),
                metadata: entry_metadata(None),
            }
        );
        assert_eq!(records[3].entry, 2);
        assert_eq!(records[3].timestamp, 20_000);
        assert_eq!(records[7].entry, 300);
        assert_eq!(
            records[7].value(replaykit_codec::LoggableType::StringArray).unwrap(),
            Value::StringArray(vec!["a".into(), "bc".into()])
        );
    }

    #[test]
    fn all_vectors_serialize() {
        let json = all_vectors_json();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["header"].as_array().unwrap().len(), 6);
        assert_eq!(parsed["data"][0]["id"], "data_boolean");
    }
}
