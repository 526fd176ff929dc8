//! Golden file helpers for log format checks.
//!
//! A golden test compares produced bytes, or a readable listing of a log,
//! with a checked-in file. Set `UPDATE_GOLDEN` to rewrite the files.

use replaykit_codec::LoggableType;
use replaykit_core::wpilog::{ControlRecord, LogFileReader};
use replaykit_storage::InMemoryBackend;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// A golden test that compares output against expected files.
pub struct GoldenTest {
    name: String,
    golden_dir: PathBuf,
    update_mode: bool,
}

impl GoldenTest {
    /// Creates a golden test named `name` reading files from `golden_dir`.
    pub fn new(name: impl Into<String>, golden_dir: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            golden_dir: golden_dir.as_ref().to_path_buf(),
            update_mode: std::env::var("UPDATE_GOLDEN").is_ok(),
        }
    }

    /// Creates a golden test using `docs/test_vectors` at the workspace root.
    pub fn with_default_dir(name: impl Into<String>) -> Self {
        let golden_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .and_then(|p| p.parent())
            .map(|p| p.join("docs").join("test_vectors"))
            .unwrap_or_else(|| PathBuf::from("test_vectors"));

        Self::new(name, golden_dir)
    }

    /// Forces update mode on or off.
    #[must_use]
    pub fn update_mode(mut self, update: bool) -> Self {
        self.update_mode = update;
        self
    }

    /// Asserts that `actual` matches the golden file.
    pub fn assert_bytes(&self, suffix: &str, actual: &[u8]) {
        let path = self.file_path(suffix);

        if self.update_mode {
            self.update_golden_file(&path, actual);
            return;
        }

        assert!(
            path.exists(),
            "Golden file not found: {}\nRun with UPDATE_GOLDEN=1 to create it.\nActual bytes (hex): {}",
            path.display(),
            hex_encode(actual)
        );

        let expected = fs::read(&path).expect("Failed to read golden file");
        assert!(
            actual == expected.as_slice(),
            "Golden test '{}' failed for '{}':\nExpected ({} bytes): {}\nActual ({} bytes): {}\nRun with UPDATE_GOLDEN=1 to update.",
            self.name,
            suffix,
            expected.len(),
            hex_encode(&expected),
            actual.len(),
            hex_encode(actual)
        );
    }

    /// Asserts that `actual` matches the golden text file.
    pub fn assert_text(&self, suffix: &str, actual: &str) {
        let path = self.file_path(suffix);

        if self.update_mode {
            self.update_golden_file(&path, actual.as_bytes());
            return;
        }

        assert!(
            path.exists(),
            "Golden file not found: {}\nRun with UPDATE_GOLDEN=1 to create it.\nActual:\n{actual}",
            path.display()
        );

        let expected = fs::read_to_string(&path).expect("Failed to read golden file");
        assert!(
            actual == expected,
            "Golden test '{}' failed for '{}':\n--- Expected ---\n{expected}\n--- Actual ---\n{actual}\nRun with UPDATE_GOLDEN=1 to update.",
            self.name,
            suffix
        );
    }

    /// Asserts that the listing of `log` matches the golden text file.
    pub fn assert_log(&self, suffix: &str, log: &[u8]) {
        self.assert_text(suffix, &render_log(log));
    }

    fn file_path(&self, suffix: &str) -> PathBuf {
        let filename = if suffix.is_empty() {
            format!("{}.golden", self.name)
        } else {
            format!("{}_{}.golden", self.name, suffix)
        };
        self.golden_dir.join(filename)
    }

    fn update_golden_file(&self, path: &Path, data: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create golden directory");
        }
        fs::write(path, data).expect("Failed to write golden file");
        println!("Updated golden file: {}", path.display());
    }
}

/// Renders a log as one line per record.
///
/// Data records show the entry name and decoded value, so listings stay
/// readable when entry ids shift.
pub fn render_log(log: &[u8]) -> String {
    let backend = InMemoryBackend::with_data(log.to_vec());
    let reader = LogFileReader::open(Box::new(backend)).expect("Invalid log header");
    let mut out = String::new();
    let _ = writeln!(out, "header {:#06x} {:?}", reader.version(), reader.extra_header());

    let mut entries: HashMap<u32, (String, String)> = HashMap::new();
    for item in reader.records() {
        let (_, record) = item.expect("Failed to read record");
        let ts = record.timestamp;
        if record.is_control() {
            match record.as_control().expect("Invalid control record") {
                ControlRecord::Start {
                    entry,
                    name,
                    type_string,
                    metadata,
                } => {
                    let _ = writeln!(out, "{ts} start {name} {type_string} {metadata}");
                    entries.insert(entry, (name, type_string));
                }
                ControlRecord::Finish { entry } => {
                    let _ = writeln!(out, "{ts} finish {entry}");
                }
                ControlRecord::SetMetadata { entry, metadata } => {
                    let name = entries.get(&entry).map_or("?", |(name, _)| name.as_str());
                    let _ = writeln!(out, "{ts} metadata {name} {metadata}");
                }
            }
            continue;
        }
        match entries.get(&record.entry) {
            Some((name, type_string)) => {
                let value = record
                    .value(LoggableType::from_wpilog_type(type_string))
                    .expect("Invalid payload");
                let _ = writeln!(out, "{ts} {name} = {value}");
            }
            None => {
                let _ = writeln!(out, "{ts} <entry {}> {}", record.entry, hex_encode(&record.payload));
            }
        }
    }
    out
}

/// Encodes bytes as a lowercase hex string.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes a hex string, ignoring whitespace.
pub fn hex_decode(hex: &str) -> Vec<u8> {
    let hex = hex.replace([' ', '\n', '\r'], "");
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("Invalid hex"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaykit_codec::Value;
    use replaykit_core::wpilog::{entry_metadata, LogFileWriter};
    use tempfile::TempDir;

    fn sample_log() -> Vec<u8> {
        let backend = InMemoryBackend::new();
        let mut writer = LogFileWriter::new(Box::new(backend.clone()), "AdvantageKit").unwrap();
        let ts = writer
            .start("/Timestamp", "int64", &entry_metadata(None), 0)
            .unwrap();
        let angle = writer
            .start("/Arm/Angle", "double", &entry_metadata(Some("radians")), 0)
            .unwrap();
        writer.append(ts, &Value::Integer(20_000), 20_000).unwrap();
        writer.append(angle, &Value::Double(0.5), 20_000).unwrap();
        writer.flush().unwrap();
        backend.data()
    }

    #[test]
    fn hex_round_trip() {
        let bytes = vec![0x00, 0x7f, 0xff];
        assert_eq!(hex_encode(&bytes), "007fff");
        assert_eq!(hex_decode("00 7f\nff"), bytes);
    }

    #[test]
    fn render_lists_records() {
        let listing = render_log(&sample_log());
        let lines: Vec<_> = listing.lines().collect();
        assert_eq!(lines[0], "header 0x0100 \"AdvantageKit\"");
        assert_eq!(
            lines[1],
            "0 start /Timestamp int64 {\"source\":\"AdvantageKit\"}"
        );
        assert_eq!(lines[3], "20000 /Timestamp = 20000");
        assert_eq!(lines[4], "20000 /Arm/Angle = 0.5");
    }

    #[test]
    fn update_then_compare() {
        let dir = TempDir::new().unwrap();
        let log = sample_log();

        GoldenTest::new("sample", dir.path())
            .update_mode(true)
            .assert_log("listing", &log);
        assert!(dir.path().join("sample_listing.golden").exists());

        GoldenTest::new("sample", dir.path())
            .update_mode(false)
            .assert_log("listing", &log);
    }

    #[test]
    #[should_panic(expected = "Golden test 'sample' failed")]
    fn mismatch_panics() {
        let dir = TempDir::new().unwrap();
        GoldenTest::new("sample", dir.path())
            .update_mode(true)
            .assert_bytes("raw", &[1, 2, 3]);
        GoldenTest::new("sample", dir.path())
            .update_mode(false)
            .assert_bytes("raw", &[1, 2, 4]);
    }
}
