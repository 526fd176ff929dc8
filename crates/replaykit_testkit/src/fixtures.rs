//! Test fixtures: temporary log folders, recording sinks and scripted
//! replay sources.

use parking_lot::Mutex;
use replaykit_codec::LogValue;
use replaykit_core::{CoreResult, LogDataReceiver, LogReplaySource, LogTable};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A temporary folder for log files, removed on drop.
pub struct TestLogDir {
    dir: TempDir,
}

impl TestLogDir {
    /// Creates a new empty folder.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// The folder path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a `.wpilog` file named `name` in the folder.
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.wpilog"))
    }

    /// All `.wpilog` files currently in the folder, sorted.
    pub fn log_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<_> = std::fs::read_dir(self.dir.path())
            .expect("Failed to read temp directory")
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "wpilog"))
            .collect();
        files.sort();
        files
    }
}

impl Default for TestLogDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` with a temporary log folder.
pub fn with_temp_log_dir<F, R>(f: F) -> R
where
    F: FnOnce(&TestLogDir) -> R,
{
    let dir = TestLogDir::new();
    f(&dir)
}

#[derive(Debug, Default)]
struct RecordingState {
    started: usize,
    ended: usize,
    tables: Vec<LogTable>,
}

/// Handle to the snapshots seen by a [`RecordingReceiver`].
#[derive(Debug, Clone, Default)]
pub struct Recording(Arc<Mutex<RecordingState>>);

impl Recording {
    /// Snapshots received so far, in order.
    pub fn tables(&self) -> Vec<LogTable> {
        self.0.lock().tables.iter().map(LogTable::snapshot).collect()
    }

    /// Timestamps of the snapshots received so far.
    pub fn timestamps(&self) -> Vec<i64> {
        self.0.lock().tables.iter().map(LogTable::timestamp).collect()
    }

    /// Number of snapshots received.
    pub fn len(&self) -> usize {
        self.0.lock().tables.len()
    }

    /// True if no snapshot was received.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `start` calls.
    pub fn started(&self) -> usize {
        self.0.lock().started
    }

    /// Number of `end` calls.
    pub fn ended(&self) -> usize {
        self.0.lock().ended
    }
}

/// A sink that keeps every snapshot in memory.
#[derive(Debug, Default)]
pub struct RecordingReceiver {
    recording: Recording,
}

impl RecordingReceiver {
    /// Creates a receiver and the handle to read what it receives.
    pub fn new() -> (Self, Recording) {
        let recording = Recording::default();
        (
            Self {
                recording: recording.clone(),
            },
            recording,
        )
    }
}

impl LogDataReceiver for RecordingReceiver {
    fn start(&mut self) -> CoreResult<()> {
        self.recording.0.lock().started += 1;
        Ok(())
    }

    fn put_table(&mut self, table: &LogTable) -> CoreResult<()> {
        self.recording.0.lock().tables.push(table.snapshot());
        Ok(())
    }

    fn end(&mut self) -> CoreResult<()> {
        self.recording.0.lock().ended += 1;
        Ok(())
    }
}

/// A replay source that plays back prepared cycles.
#[derive(Debug, Default)]
pub struct ScriptedReplay {
    cycles: VecDeque<(i64, BTreeMap<String, LogValue>)>,
}

impl ScriptedReplay {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cycle. Keys are relative to the table root.
    #[must_use]
    pub fn cycle<K, I>(mut self, timestamp: i64, fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, LogValue)>,
    {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.cycles.push_back((timestamp, fields));
        self
    }

    /// Builds a script from recorded snapshots, e.g. a capture run's
    /// [`Recording`].
    pub fn from_tables(tables: &[LogTable]) -> Self {
        let cycles = tables
            .iter()
            .map(|table| {
                let fields = table
                    .get_all(false)
                    .into_iter()
                    .map(|(key, value)| {
                        let key = key.strip_prefix('/').unwrap_or(&key).to_string();
                        (key, (*value).clone())
                    })
                    .collect();
                (table.timestamp(), fields)
            })
            .collect();
        Self { cycles }
    }

    /// Number of cycles left.
    pub fn remaining(&self) -> usize {
        self.cycles.len()
    }
}

impl LogReplaySource for ScriptedReplay {
    fn start(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn update_table(&mut self, table: &LogTable) -> bool {
        let Some((timestamp, fields)) = self.cycles.pop_front() else {
            return false;
        };
        table.set_timestamp(timestamp);
        for (key, value) in fields {
            table.put_value(&key, value);
        }
        true
    }
}
