//! Streaming WPILOG reader.
//!
//! Records are parsed one at a time from a fixed-size read buffer, so memory
//! use does not grow with the log. A record cut off at the end of the file,
//! as left behind by a crash mid-write, is treated as the end of the log.

use crate::error::{CoreError, CoreResult};
use crate::wpilog::record::{
    header_field_lengths, read_uint, WpilogRecord, FILE_HEADER_SIZE, WPILOG_MAGIC,
};
use replaykit_storage::StorageBackend;

/// Read buffer size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// An opened log with a validated header.
pub struct LogFileReader {
    backend: Box<dyn StorageBackend>,
    version: u16,
    extra_header: String,
    data_start: u64,
}

impl LogFileReader {
    /// Opens a log and validates its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read, the magic is wrong,
    /// the version is older than 1.0 or the extra header is cut off.
    pub fn open(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let size = backend.size()?;
        if size < FILE_HEADER_SIZE as u64 {
            return Err(CoreError::invalid_format("file too short for a WPILOG header"));
        }
        let header = backend.read_at(0, FILE_HEADER_SIZE)?;
        if header[..6] != WPILOG_MAGIC {
            return Err(CoreError::invalid_format("missing WPILOG magic"));
        }
        let version = u16::from_le_bytes([header[6], header[7]]);
        if version < 0x0100 {
            return Err(CoreError::invalid_format(format!(
                "unsupported WPILOG version {}.{}",
                version >> 8,
                version & 0xff
            )));
        }
        let extra_len = u64::from(u32::from_le_bytes([header[8], header[9], header[10], header[11]]));
        let data_start = FILE_HEADER_SIZE as u64 + extra_len;
        if data_start > size {
            return Err(CoreError::invalid_format("extra header extends past end of file"));
        }
        let extra = backend.read_at(FILE_HEADER_SIZE as u64, usize::try_from(extra_len).unwrap_or(usize::MAX))?;
        let extra_header = String::from_utf8(extra)
            .map_err(|_| CoreError::invalid_format("extra header is not valid UTF-8"))?;

        Ok(Self {
            backend,
            version,
            extra_header,
            data_start,
        })
    }

    /// Format version from the header.
    #[must_use]
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Extra header string, `AdvantageKit` for logs written by this crate.
    #[must_use]
    pub fn extra_header(&self) -> &str {
        &self.extra_header
    }

    /// Streams the records after the header.
    #[must_use]
    pub fn records(self) -> WpilogRecordIterator {
        WpilogRecordIterator::new(self.backend, self.data_start)
    }
}

impl std::fmt::Debug for LogFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFileReader")
            .field("version", &self.version)
            .field("extra_header", &self.extra_header)
            .finish_non_exhaustive()
    }
}

/// A streaming iterator over log records.
///
/// Yields `(offset, record)` pairs. Truncated records end the iteration;
/// backend errors are yielded once and end it too.
pub struct WpilogRecordIterator {
    backend: Box<dyn StorageBackend>,
    total_size: Option<u64>,
    current_offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    finished: bool,
}

impl WpilogRecordIterator {
    fn new(backend: Box<dyn StorageBackend>, start_offset: u64) -> Self {
        Self {
            backend,
            total_size: None,
            current_offset: start_offset,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            finished: false,
        }
    }

    /// Ensures at least `min_bytes` are buffered from the current position.
    ///
    /// Returns `false` if the log ends first. Grows the buffer for records
    /// larger than it.
    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }

        let total_size = match self.total_size {
            Some(size) => size,
            None => {
                let size = self.backend.size()?;
                self.total_size = Some(size);
                size
            }
        };
        let unread = total_size.saturating_sub(self.current_offset);
        let remaining = usize::try_from(unread).unwrap_or(usize::MAX) - available;
        if remaining < min_bytes - available {
            return Ok(false);
        }

        if self.buffer_pos > 0 && available > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;

        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let to_read = (self.buffer.len() - self.buffer_len).min(remaining);
        if to_read > 0 {
            let read_offset = self.current_offset + self.buffer_len as u64;
            let data = self.backend.read_at(read_offset, to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len - self.buffer_pos >= min_bytes)
    }

    fn read_next_record(&mut self) -> CoreResult<Option<(u64, WpilogRecord)>> {
        let record_offset = self.current_offset;

        if !self.ensure_buffered(1)? {
            return Ok(None);
        }
        let (entry_len, size_len, timestamp_len) =
            header_field_lengths(self.buffer[self.buffer_pos]);
        let header_len = 1 + entry_len + size_len + timestamp_len;
        if !self.ensure_buffered(header_len)? {
            return Ok(None);
        }

        let mut pos = self.buffer_pos + 1;
        let entry = read_uint(&self.buffer[pos..pos + entry_len]);
        pos += entry_len;
        let size = read_uint(&self.buffer[pos..pos + size_len]);
        pos += size_len;
        let timestamp = read_uint(&self.buffer[pos..pos + timestamp_len]);

        let entry = u32::try_from(entry).map_err(|_| {
            CoreError::log_corruption(record_offset, "entry id wider than 32 bits")
        })?;
        let size = usize::try_from(size).map_err(|_| {
            CoreError::log_corruption(record_offset, "payload size does not fit in memory")
        })?;

        let total_len = header_len + size;
        if !self.ensure_buffered(total_len)? {
            return Ok(None);
        }

        let payload_start = self.buffer_pos + header_len;
        let payload = self.buffer[payload_start..payload_start + size].to_vec();
        self.buffer_pos += total_len;
        self.current_offset += total_len as u64;

        // Timestamps are stored as the unsigned bit pattern.
        #[allow(clippy::cast_possible_wrap)]
        let timestamp = timestamp as i64;
        Ok(Some((
            record_offset,
            WpilogRecord {
                entry,
                timestamp,
                payload,
            },
        )))
    }
}

impl Iterator for WpilogRecordIterator {
    type Item = CoreResult<(u64, WpilogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

impl std::fmt::Debug for WpilogRecordIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WpilogRecordIterator")
            .field("offset", &self.current_offset)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wpilog::record::encode_file_header;
    use crate::wpilog::writer::LogFileWriter;
    use replaykit_codec::Value;
    use replaykit_storage::InMemoryBackend;

    fn log_with(records: usize, payload_len: usize) -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        let mut writer = LogFileWriter::new(Box::new(backend.clone()), "AdvantageKit").unwrap();
        let entry = writer.start("/Blob", "raw", "", 0).unwrap();
        for i in 0..records {
            let value = Value::Raw(vec![u8::try_from(i % 256).unwrap(); payload_len]);
            writer.append(entry, &value, i64::try_from(i).unwrap()).unwrap();
        }
        writer.flush().unwrap();
        backend
    }

    #[test]
    fn rejects_bad_headers() {
        let short = InMemoryBackend::with_data(b"WPI".to_vec());
        assert!(LogFileReader::open(Box::new(short)).is_err());

        let mut wrong_magic = encode_file_header("").unwrap();
        wrong_magic[0] = b'X';
        assert!(LogFileReader::open(Box::new(InMemoryBackend::with_data(wrong_magic))).is_err());

        let mut old_version = encode_file_header("").unwrap();
        old_version[6] = 0;
        old_version[7] = 0;
        assert!(LogFileReader::open(Box::new(InMemoryBackend::with_data(old_version))).is_err());

        let mut cut = encode_file_header("AdvantageKit").unwrap();
        cut.truncate(16);
        assert!(LogFileReader::open(Box::new(InMemoryBackend::with_data(cut))).is_err());
    }

    #[test]
    fn header_only_log_has_no_records() {
        let data = encode_file_header("AdvantageKit").unwrap();
        let reader = LogFileReader::open(Box::new(InMemoryBackend::with_data(data))).unwrap();
        assert_eq!(reader.version(), 0x0100);
        assert_eq!(reader.records().count(), 0);
    }

    #[test]
    fn streams_across_buffer_refills() {
        // Enough records to cross several 64 KiB refills.
        let backend = log_with(2000, 100);
        let reader = LogFileReader::open(Box::new(backend)).unwrap();
        let records: Vec<_> = reader.records().collect::<CoreResult<_>>().unwrap();
        assert_eq!(records.len(), 2001);
        let (_, last) = &records[2000];
        assert_eq!(last.timestamp, 1999);
        assert_eq!(last.payload, vec![(1999 % 256) as u8; 100]);
    }

    #[test]
    fn record_larger_than_buffer() {
        let backend = log_with(2, READ_BUFFER_SIZE * 2);
        let reader = LogFileReader::open(Box::new(backend)).unwrap();
        let records: Vec<_> = reader.records().map(|r| r.unwrap().1).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].payload.len(), READ_BUFFER_SIZE * 2);
    }

    #[test]
    fn truncated_tail_ends_iteration() {
        let full = log_with(3, 8).data();
        for cut in 1..=12 {
            let data = full[..full.len() - cut].to_vec();
            let reader = LogFileReader::open(Box::new(InMemoryBackend::with_data(data))).unwrap();
            let records: Vec<_> = reader.records().collect::<CoreResult<_>>().unwrap();
            // The start record and two complete appends survive.
            assert_eq!(records.len(), 3, "cut {cut}");
        }
    }

    #[test]
    fn offsets_point_at_record_starts() {
        let backend = log_with(2, 4);
        let data = backend.data();
        let reader = LogFileReader::open(Box::new(backend)).unwrap();
        for result in reader.records() {
            let (offset, record) = result.unwrap();
            let mut encoded = Vec::new();
            record.encode(&mut encoded).unwrap();
            let start = usize::try_from(offset).unwrap();
            assert_eq!(&data[start..start + encoded.len()], encoded.as_slice());
        }
    }
}
