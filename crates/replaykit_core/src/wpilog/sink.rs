//! Cycle snapshots to a WPILOG file.

use crate::error::{CoreError, CoreResult};
use crate::receiver::{LogDataReceiver, TIMESTAMP_KEY};
use crate::table::LogTable;
use crate::wpilog::writer::LogFileWriter;
use crate::wpilog::{entry_metadata, EXTRA_HEADER, LOG_EXTENSION};
use chrono::{Local, NaiveDateTime};
use replaykit_codec::{LogValue, LoggableType, Value};
use replaykit_storage::FileBackend;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DS_ATTACHED_KEY: &str = "DriverStation/DSAttached";
const EPOCH_TIME_VALID_KEY: &str = "SystemStats/EpochTimeValid";
const MATCH_TYPE_KEY: &str = "DriverStation/MatchType";
const MATCH_NUMBER_KEY: &str = "DriverStation/MatchNumber";
const EVENT_NAME_KEY: &str = "DriverStation/EventName";

/// File name date format once the wall clock is trusted.
const DATE_FORMAT: &str = "%y-%m-%d_%H-%M-%S";

/// Configuration for a [`WpilogWriter`].
#[derive(Debug, Clone)]
pub struct WpilogWriterConfig {
    /// A `.wpilog` file, or a folder to create a named log in.
    pub path: PathBuf,

    /// Whether the file is renamed once the date and match are known.
    /// On by default when `path` is a folder.
    pub auto_rename: bool,

    /// How long the driver station must be attached with a valid clock
    /// before the date is trusted.
    pub rename_delay: Duration,

    /// Extra header written after the magic.
    pub extra_header: String,
}

impl WpilogWriterConfig {
    /// Creates a configuration for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let auto_rename = !is_log_file(&path);
        Self {
            path,
            auto_rename,
            rename_delay: Duration::from_secs(5),
            extra_header: EXTRA_HEADER.to_string(),
        }
    }

    /// Sets the rename delay.
    #[must_use]
    pub fn rename_delay(mut self, delay: Duration) -> Self {
        self.rename_delay = delay;
        self
    }

    /// Sets the extra header.
    #[must_use]
    pub fn extra_header(mut self, extra_header: impl Into<String>) -> Self {
        self.extra_header = extra_header.into();
        self
    }
}

fn is_log_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == LOG_EXTENSION)
}

#[derive(Debug)]
struct EntryState {
    id: u32,
    loggable_type: LoggableType,
    unit: Option<String>,
}

/// Writes every snapshot to a WPILOG file.
///
/// Fields are delta encoded: a field is appended in the cycle it first
/// appears and afterwards only in cycles where its value changed.
/// `/Timestamp` is appended every cycle.
///
/// I/O failures are logged once and the writer keeps trying on later
/// cycles; they are never returned to the dispatcher.
pub struct WpilogWriter {
    config: WpilogWriterConfig,
    folder: PathBuf,
    filename: String,
    random_id: String,
    writer: Option<LogFileWriter>,
    timestamp_entry: u32,
    entries: HashMap<String, EntryState>,
    last: BTreeMap<String, Arc<LogValue>>,
    ds_attached_since: Option<i64>,
    log_date: Option<NaiveDateTime>,
    match_text: Option<String>,
    rejected_name: Option<String>,
    resume_entry: Option<u32>,
    failing: bool,
}

impl WpilogWriter {
    /// Creates a writer. Nothing is touched on disk until `start`.
    #[must_use]
    pub fn new(config: WpilogWriterConfig) -> Self {
        let random_id = format!("{:016x}", rand::random::<u64>());
        let (folder, filename) = if is_log_file(&config.path) {
            let folder = config
                .path
                .parent()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
            let filename = config
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            (folder, filename)
        } else {
            (config.path.clone(), format!("akit_{random_id}.{LOG_EXTENSION}"))
        };
        Self {
            config,
            folder,
            filename,
            random_id,
            writer: None,
            timestamp_entry: 0,
            entries: HashMap::new(),
            last: BTreeMap::new(),
            ds_attached_since: None,
            log_date: None,
            match_text: None,
            rejected_name: None,
            resume_entry: None,
            failing: false,
        }
    }

    /// Current path of the log file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.folder.join(&self.filename)
    }

    fn open(&mut self) -> CoreResult<()> {
        fs::create_dir_all(&self.folder)?;
        let path = self.path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let backend = FileBackend::create(&path)?;
        let mut writer = LogFileWriter::new(Box::new(backend), &self.config.extra_header)?;
        self.timestamp_entry = writer.start(
            TIMESTAMP_KEY,
            LoggableType::Integer.wpilog_type(),
            &entry_metadata(None),
            0,
        )?;
        self.writer = Some(writer);
        tracing::info!(path = %path.display(), "logging to file");
        Ok(())
    }

    /// Reopens the current file after it was closed mid-session, or opens
    /// a fresh one if it never was.
    fn reopen(&mut self) -> CoreResult<()> {
        let Some(next_entry) = self.resume_entry else {
            return self.open();
        };
        let backend = FileBackend::open(&self.path())?;
        self.writer = Some(LogFileWriter::resume(Box::new(backend), next_entry));
        self.resume_entry = None;
        Ok(())
    }

    fn update_date(&mut self, table: &LogTable) {
        if self.log_date.is_some() {
            return;
        }
        let attached = table.get(DS_ATTACHED_KEY, false) && table.get(EPOCH_TIME_VALID_KEY, false);
        if !attached {
            self.ds_attached_since = None;
            return;
        }
        let now = table.timestamp();
        match self.ds_attached_since {
            None => self.ds_attached_since = Some(now),
            Some(since) => {
                let delay = i64::try_from(self.config.rename_delay.as_micros()).unwrap_or(i64::MAX);
                if now - since > delay {
                    self.log_date = Some(Local::now().naive_local());
                }
            }
        }
    }

    fn update_match(&mut self, table: &LogTable) {
        if self.match_text.is_some() {
            return;
        }
        let prefix = match table.get(MATCH_TYPE_KEY, 0i64) {
            1 => "p",
            2 => "q",
            3 => "e",
            _ => return,
        };
        let number = table.get(MATCH_NUMBER_KEY, 0i64);
        self.match_text = Some(format!("{prefix}{number}"));
    }

    fn target_filename(&self, table: &LogTable) -> String {
        let mut name = String::from("akit_");
        match &self.log_date {
            Some(date) => name.push_str(&date.format(DATE_FORMAT).to_string()),
            None => name.push_str(&self.random_id),
        }
        let event = table
            .get(EVENT_NAME_KEY, String::new())
            .to_lowercase()
            .replace(['/', '\\'], "_");
        if !event.is_empty() {
            name.push('_');
            name.push_str(&event);
        }
        if let Some(match_text) = &self.match_text {
            name.push('_');
            name.push_str(match_text);
        }
        name.push('.');
        name.push_str(LOG_EXTENSION);
        name
    }

    /// Moves the open log to `filename` and keeps writing there.
    ///
    /// If the move fails the log stays where it is, and `filename` is not
    /// tried again.
    fn rename(&mut self, filename: String) -> CoreResult<()> {
        let from = self.path();
        let to = self.folder.join(&filename);

        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        if let Some(writer) = self.writer.take() {
            self.resume_entry = Some(writer.next_entry());
            writer.close()?;
        }

        match fs::rename(&from, &to) {
            Ok(()) => {
                tracing::info!(from = %from.display(), to = %to.display(), "renamed log file");
                self.filename = filename;
            }
            Err(err) => {
                tracing::error!(
                    from = %from.display(),
                    to = %to.display(),
                    error = %err,
                    "failed to rename log file, keeping current name"
                );
                self.rejected_name = Some(filename);
            }
        }
        self.reopen()
    }

    fn write_cycle(&mut self, table: &LogTable) -> CoreResult<()> {
        if self.writer.is_none() {
            self.reopen()?;
        }
        if self.config.auto_rename {
            self.update_date(table);
            self.update_match(table);
            let target = self.target_filename(table);
            if target != self.filename && self.rejected_name.as_ref() != Some(&target) {
                self.rename(target)?;
            }
        }

        let Some(writer) = self.writer.as_mut() else {
            return Err(CoreError::invalid_operation("log file is not open"));
        };
        let timestamp = table.timestamp();
        writer.append(self.timestamp_entry, &Value::Integer(timestamp), timestamp)?;

        let fields = table.get_all(false);
        for (key, value) in &fields {
            let append = match self.entries.get_mut(key) {
                None => {
                    let id = writer.start(
                        key,
                        value.wpilog_type(),
                        &entry_metadata(value.unit()),
                        timestamp,
                    )?;
                    self.entries.insert(
                        key.clone(),
                        EntryState {
                            id,
                            loggable_type: value.loggable_type(),
                            unit: value.unit().map(str::to_string),
                        },
                    );
                    true
                }
                Some(entry) => {
                    if entry.loggable_type != value.loggable_type() {
                        continue;
                    }
                    if entry.unit.as_deref() != value.unit() {
                        writer.set_metadata(entry.id, &entry_metadata(value.unit()), timestamp)?;
                        entry.unit = value.unit().map(str::to_string);
                    }
                    self.last
                        .get(key)
                        .map_or(true, |previous| previous.value() != value.value())
                }
            };
            if append {
                if let Some(entry) = self.entries.get(key) {
                    writer.append(entry.id, value.value(), timestamp)?;
                }
            }
        }

        writer.flush()?;
        self.last = fields;
        Ok(())
    }
}

impl LogDataReceiver for WpilogWriter {
    fn start(&mut self) -> CoreResult<()> {
        self.entries.clear();
        self.last.clear();
        self.log_date = None;
        self.match_text = None;
        self.ds_attached_since = None;
        self.rejected_name = None;
        self.resume_entry = None;
        if let Err(err) = self.open() {
            tracing::error!(path = %self.path().display(), error = %err, "failed to open log file");
        }
        Ok(())
    }

    fn put_table(&mut self, table: &LogTable) -> CoreResult<()> {
        match self.write_cycle(table) {
            Ok(()) => {
                if self.failing {
                    tracing::info!(path = %self.path().display(), "log writes recovered");
                    self.failing = false;
                }
            }
            Err(err) => {
                if !self.failing {
                    tracing::error!(
                        path = %self.path().display(),
                        timestamp = table.timestamp(),
                        error = %err,
                        "failed to write log cycle"
                    );
                    self.failing = true;
                }
            }
        }
        Ok(())
    }

    fn end(&mut self) -> CoreResult<()> {
        if let Some(writer) = self.writer.take() {
            if let Err(err) = writer.close() {
                tracing::error!(path = %self.path().display(), error = %err, "failed to close log file");
            }
            tracing::info!(path = %self.path().display(), "log file closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for WpilogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WpilogWriter")
            .field("path", &self.path())
            .field("entries", &self.entries.len())
            .field("failing", &self.failing)
            .finish_non_exhaustive()
    }
}
