//! Low-level WPILOG writer.

use crate::error::{CoreError, CoreResult};
use crate::wpilog::record::{encode_file_header, ControlRecord, WpilogRecord};
use replaykit_codec::Value;
use replaykit_storage::StorageBackend;

/// Appends WPILOG records to a storage backend.
///
/// Records are encoded into an in-memory buffer and reach the backend on
/// [`flush`](LogFileWriter::flush), so a cycle's worth of records is
/// written in a single append.
pub struct LogFileWriter {
    backend: Box<dyn StorageBackend>,
    buffer: Vec<u8>,
    next_entry: u32,
}

impl LogFileWriter {
    /// Creates a writer for a new log and buffers the file header.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend already holds data.
    pub fn new(backend: Box<dyn StorageBackend>, extra_header: &str) -> CoreResult<Self> {
        if backend.size()? != 0 {
            return Err(CoreError::invalid_operation(
                "log backend is not empty; refusing to write a second header",
            ));
        }
        Ok(Self {
            backend,
            buffer: encode_file_header(extra_header)?,
            next_entry: 1,
        })
    }

    /// Continues an existing log whose highest entry id is `next_entry - 1`.
    #[must_use]
    pub fn resume(backend: Box<dyn StorageBackend>, next_entry: u32) -> Self {
        Self {
            backend,
            buffer: Vec::new(),
            next_entry,
        }
    }

    /// The id the next started entry will get.
    #[must_use]
    pub fn next_entry(&self) -> u32 {
        self.next_entry
    }

    fn push(&mut self, record: &WpilogRecord) -> CoreResult<()> {
        record.encode(&mut self.buffer)
    }

    /// Starts a new entry and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry ids are exhausted or a string is too
    /// long to encode.
    pub fn start(
        &mut self,
        name: &str,
        type_string: &str,
        metadata: &str,
        timestamp: i64,
    ) -> CoreResult<u32> {
        let entry = self.next_entry;
        self.next_entry = entry
            .checked_add(1)
            .ok_or_else(|| CoreError::invalid_operation("log entry ids exhausted"))?;
        let control = ControlRecord::Start {
            entry,
            name: name.to_string(),
            type_string: type_string.to_string(),
            metadata: metadata.to_string(),
        };
        self.push(&WpilogRecord::control(&control, timestamp)?)?;
        Ok(entry)
    }

    /// Finishes an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded.
    pub fn finish(&mut self, entry: u32, timestamp: i64) -> CoreResult<()> {
        self.push(&WpilogRecord::control(
            &ControlRecord::Finish { entry },
            timestamp,
        )?)
    }

    /// Replaces an entry's metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded.
    pub fn set_metadata(&mut self, entry: u32, metadata: &str, timestamp: i64) -> CoreResult<()> {
        let control = ControlRecord::SetMetadata {
            entry,
            metadata: metadata.to_string(),
        };
        self.push(&WpilogRecord::control(&control, timestamp)?)
    }

    /// Appends a data record.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    pub fn append(&mut self, entry: u32, value: &Value, timestamp: i64) -> CoreResult<()> {
        self.push(&WpilogRecord::data(entry, timestamp, value)?)
    }

    /// Number of encoded bytes not yet written to the backend.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Writes buffered records to the backend and flushes it.
    ///
    /// The buffer is kept if the write fails so nothing is lost on a retry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write or flush fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        if !self.buffer.is_empty() {
            self.backend.append(&self.buffer)?;
            self.buffer.clear();
        }
        self.backend.flush()?;
        Ok(())
    }

    /// Flushes and syncs, then returns the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn close(mut self) -> CoreResult<Box<dyn StorageBackend>> {
        self.flush()?;
        self.backend.sync()?;
        Ok(self.backend)
    }
}

impl std::fmt::Debug for LogFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFileWriter")
            .field("pending", &self.buffer.len())
            .field("next_entry", &self.next_entry)
            .finish_non_exhaustive()
    }
}
