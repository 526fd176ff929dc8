//! Replaying a WPILOG file cycle by cycle.

use crate::error::{CoreError, CoreResult};
use crate::receiver::{LogReplaySource, TIMESTAMP_KEY};
use crate::table::LogTable;
use crate::wpilog::reader::{LogFileReader, WpilogRecordIterator};
use crate::wpilog::record::ControlRecord;
use crate::wpilog::EXTRA_HEADER;
use replaykit_codec::{LogValue, LoggableType, SCHEMA_CUSTOM_TYPE};
use replaykit_storage::{FileBackend, StorageBackend};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Outputs recorded during an earlier replay are never fed back.
const REPLAY_OUTPUTS_PREFIX: &str = "ReplayOutputs";

#[derive(Debug)]
struct ReplayEntry {
    name: String,
    loggable_type: LoggableType,
    custom_type: Option<String>,
}

pub(crate) fn keeps_custom_type(type_string: &str) -> bool {
    type_string.starts_with("struct:")
        || type_string.starts_with("proto:")
        || type_string == SCHEMA_CUSTOM_TYPE
}

enum Source {
    Path(PathBuf),
    Backend(Box<dyn StorageBackend>),
    Opened,
}

/// Feeds a WPILOG file back into a [`Logger`](crate::Logger).
///
/// A cycle is every data record between two `/Timestamp` appends whose
/// timestamp matches the first of them. Each call to `update_table` loads
/// one cycle; the last cycle in the file is replayed too.
pub struct WpilogReader {
    source: Source,
    records: Option<WpilogRecordIterator>,
    entries: HashMap<u32, ReplayEntry>,
    next_timestamp: Option<i64>,
    finished: bool,
}

impl WpilogReader {
    /// Creates a reader for the log at `path`. The file is opened on
    /// `start`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_source(Source::Path(path.into()))
    }

    /// Creates a reader over an already opened backend.
    #[must_use]
    pub fn from_backend(backend: Box<dyn StorageBackend>) -> Self {
        Self::with_source(Source::Backend(backend))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            records: None,
            entries: HashMap::new(),
            next_timestamp: None,
            finished: false,
        }
    }

    fn open_backend(path: &Path) -> CoreResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FileBackend::open_read_only(path)?))
    }

    fn register(&mut self, control: ControlRecord) {
        if let ControlRecord::Start {
            entry,
            name,
            type_string,
            ..
        } = control
        {
            let custom_type = keeps_custom_type(&type_string).then(|| type_string.clone());
            self.entries.insert(
                entry,
                ReplayEntry {
                    name,
                    loggable_type: LoggableType::from_wpilog_type(&type_string),
                    custom_type,
                },
            );
        }
    }

    /// Reads records into `table` until the next cycle begins.
    ///
    /// Returns the timestamp of the loaded cycle, or `None` if the log held
    /// no further cycle.
    fn read_cycle(&mut self, table: &LogTable) -> CoreResult<Option<i64>> {
        let mut current = self.next_timestamp.take();
        let Some(mut records) = self.records.take() else {
            return Ok(None);
        };

        let result = loop {
            let Some(next) = records.next() else {
                self.finished = true;
                break Ok(current);
            };
            let (offset, record) = match next {
                Ok(item) => item,
                Err(err) => break Err(err),
            };

            if record.is_control() {
                match record.as_control() {
                    Ok(control) => self.register(control),
                    Err(err) => {
                        break Err(CoreError::log_corruption(offset, err.to_string()));
                    }
                }
                continue;
            }

            let Some(entry) = self.entries.get(&record.entry) else {
                continue;
            };
            if entry.name == TIMESTAMP_KEY {
                let timestamp = match record.value(LoggableType::Integer) {
                    Ok(value) => value.as_integer().unwrap_or_default(),
                    Err(err) => break Err(CoreError::log_corruption(offset, err.to_string())),
                };
                if current.is_none() {
                    current = Some(timestamp);
                    continue;
                }
                self.next_timestamp = Some(timestamp);
                break Ok(current);
            }

            if current != Some(record.timestamp) {
                continue;
            }
            let key = entry.name.strip_prefix('/').unwrap_or(&entry.name);
            if key.starts_with(REPLAY_OUTPUTS_PREFIX) {
                continue;
            }
            let value = match record.value(entry.loggable_type) {
                Ok(value) => value,
                Err(err) => break Err(CoreError::log_corruption(offset, err.to_string())),
            };
            let value = match &entry.custom_type {
                Some(custom_type) => LogValue::new(value).with_custom_type(custom_type.clone()),
                None => LogValue::new(value),
            };
            table.put_value(key, value);
        };

        if !self.finished {
            self.records = Some(records);
        }
        result
    }
}

impl LogReplaySource for WpilogReader {
    fn start(&mut self) -> CoreResult<()> {
        let backend = match std::mem::replace(&mut self.source, Source::Opened) {
            Source::Path(path) => {
                tracing::info!(path = %path.display(), "replaying log file");
                Self::open_backend(&path)?
            }
            Source::Backend(backend) => backend,
            Source::Opened => {
                return Err(CoreError::invalid_operation("replay source already started"))
            }
        };
        let reader = LogFileReader::open(backend)?;
        if reader.extra_header() != EXTRA_HEADER {
            return Err(CoreError::invalid_format(format!(
                "log was not written by this logger (extra header {:?})",
                reader.extra_header()
            )));
        }
        self.records = Some(reader.records());
        self.entries.clear();
        self.next_timestamp = None;
        self.finished = false;
        Ok(())
    }

    fn end(&mut self) {
        self.records = None;
        self.finished = true;
    }

    fn update_table(&mut self, table: &LogTable) -> bool {
        match self.read_cycle(table) {
            Ok(Some(timestamp)) => {
                table.set_timestamp(timestamp);
                true
            }
            Ok(None) => false,
            Err(err) => {
                tracing::error!(error = %err, "replay log read failed, ending replay");
                self.records = None;
                self.finished = true;
                false
            }
        }
    }
}

impl std::fmt::Debug for WpilogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WpilogReader")
            .field("entries", &self.entries.len())
            .field("next_timestamp", &self.next_timestamp)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wpilog::entry_metadata;
    use crate::wpilog::writer::LogFileWriter;
    use replaykit_codec::Value;
    use replaykit_storage::InMemoryBackend;

    struct LogBuilder {
        backend: InMemoryBackend,
        writer: LogFileWriter,
        timestamp: u32,
    }

    impl LogBuilder {
        fn new(extra_header: &str) -> Self {
            let backend = InMemoryBackend::new();
            let mut writer = LogFileWriter::new(Box::new(backend.clone()), extra_header).unwrap();
            let timestamp = writer
                .start(TIMESTAMP_KEY, "int64", &entry_metadata(None), 0)
                .unwrap();
            Self {
                backend,
                writer,
                timestamp,
            }
        }

        fn cycle(&mut self, timestamp: i64) -> &mut Self {
            self.writer
                .append(self.timestamp, &Value::Integer(timestamp), timestamp)
                .unwrap();
            self
        }

        fn start(&mut self, name: &str, type_string: &str, timestamp: i64) -> u32 {
            self.writer.start(name, type_string, "", timestamp).unwrap()
        }

        fn append(&mut self, entry: u32, value: Value, timestamp: i64) -> &mut Self {
            self.writer.append(entry, &value, timestamp).unwrap();
            self
        }

        fn finish(&mut self) -> WpilogReader {
            self.writer.flush().unwrap();
            WpilogReader::from_backend(Box::new(self.backend.clone()))
        }
    }

    fn replay_all(reader: &mut WpilogReader) -> Vec<LogTable> {
        reader.start().unwrap();
        let table = LogTable::new(0);
        let mut cycles = Vec::new();
        while reader.update_table(&table) {
            cycles.push(table.snapshot());
        }
        cycles
    }

    #[test]
    fn replays_every_cycle_including_last() {
        let mut log = LogBuilder::new(EXTRA_HEADER);
        log.cycle(1_000);
        let speed = log.start("/Drive/Speed", "double", 1_000);
        log.append(speed, Value::Double(1.5), 1_000);
        log.cycle(2_000);
        log.cycle(3_000).append(speed, Value::Double(2.5), 3_000);
        let mut reader = log.finish();

        let cycles = replay_all(&mut reader);
        let seen: Vec<_> = cycles
            .iter()
            .map(|t| (t.timestamp(), t.get("Drive/Speed", 0.0)))
            .collect();
        assert_eq!(seen, vec![(1_000, 1.5), (2_000, 1.5), (3_000, 2.5)]);
        assert!(!reader.update_table(&LogTable::new(0)));
    }

    #[test]
    fn skips_replay_outputs_and_stale_records() {
        let mut log = LogBuilder::new(EXTRA_HEADER);
        log.cycle(10);
        let old = log.start("/ReplayOutputs/Old", "int64", 10);
        let real = log.start("/RealOutputs/New", "int64", 10);
        log.append(old, Value::Integer(1), 10)
            .append(real, Value::Integer(2), 10)
            .append(real, Value::Integer(99), 5);
        let mut reader = log.finish();

        let cycles = replay_all(&mut reader);
        assert_eq!(cycles.len(), 1);
        assert!(!cycles[0].contains("ReplayOutputs/Old"));
        assert_eq!(cycles[0].get("RealOutputs/New", 0i64), 2);
    }

    #[test]
    fn custom_types_are_kept() {
        let mut log = LogBuilder::new(EXTRA_HEADER);
        log.cycle(1);
        let pose = log.start("/Pose", "struct:Pose", 1);
        let schema = log.start("/.schema/struct:Pose", "structschema", 1);
        let plain = log.start("/Plain", "raw", 1);
        log.append(pose, Value::Raw(vec![1, 2]), 1)
            .append(schema, Value::Raw(b"double x".to_vec()), 1)
            .append(plain, Value::Raw(vec![3]), 1);
        let mut reader = log.finish();

        let cycles = replay_all(&mut reader);
        let table = &cycles[0];
        assert_eq!(table.get_value("Pose").unwrap().custom_type(), Some("struct:Pose"));
        assert_eq!(
            table.get_value(".schema/struct:Pose").unwrap().custom_type(),
            Some(SCHEMA_CUSTOM_TYPE)
        );
        assert_eq!(table.get_value("Plain").unwrap().custom_type(), None);
    }

    #[test]
    fn rejects_foreign_logs() {
        let mut reader = LogBuilder::new("SomethingElse").finish();
        assert!(reader.start().is_err());
        assert!(!reader.update_table(&LogTable::new(0)));
    }

    #[test]
    fn empty_log_has_no_cycles() {
        let mut reader = LogBuilder::new(EXTRA_HEADER).finish();
        assert!(replay_all(&mut reader).is_empty());
    }

    #[test]
    fn corrupt_payload_ends_replay() {
        let mut log = LogBuilder::new(EXTRA_HEADER);
        log.cycle(1);
        let flag = log.start("/Flag", "boolean", 1);
        log.cycle(2);
        // A boolean payload must be exactly one byte.
        log.append(flag, Value::Integer(7), 2);
        log.cycle(3);
        let mut reader = log.finish();

        let cycles = replay_all(&mut reader);
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn missing_file_fails_to_start() {
        let mut reader = WpilogReader::new("/nonexistent/replay.wpilog");
        assert!(reader.start().is_err());
    }
}
