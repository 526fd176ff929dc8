//! Interrupted-write testing.
//!
//! A robot can lose power in the middle of a write. These helpers cut a log
//! off at arbitrary points and check that replay keeps every cycle that was
//! fully written and stops cleanly at the damage.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replaykit_testkit::crash::CrashRecoveryHarness;
//!
//! let result = CrashRecoveryHarness::new(10).crash_after_bytes(200);
//! assert!(result.passed, "{}", result.description);
//! ```

use replaykit_codec::Value;
use replaykit_core::wpilog::{entry_metadata, LogFileWriter, EXTRA_HEADER};
use replaykit_core::{LogReplaySource, LogTable, WpilogReader, TIMESTAMP_KEY};
use replaykit_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Result of a recovery check.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the check passed.
    pub passed: bool,
    /// What was checked, and what went wrong if it failed.
    pub description: String,
    /// Cycles whose flush completed before the crash.
    pub flushed_cycles: usize,
    /// Cycles replay recovered.
    pub replayed_cycles: usize,
}

/// A backend that fails every write past a byte limit.
///
/// The write that crosses the limit is applied partially, like a torn
/// write on power loss. Clones share state.
#[derive(Debug, Clone)]
pub struct CrashableBackend {
    inner: InMemoryBackend,
    bytes_written: Arc<AtomicUsize>,
    crash_after_bytes: Arc<AtomicUsize>,
    fail_on_flush: Arc<AtomicBool>,
    crashed: Arc<AtomicBool>,
}

impl CrashableBackend {
    /// Wraps `inner` with no crash armed.
    pub fn new(inner: InMemoryBackend) -> Self {
        Self {
            inner,
            bytes_written: Arc::new(AtomicUsize::new(0)),
            crash_after_bytes: Arc::new(AtomicUsize::new(usize::MAX)),
            fail_on_flush: Arc::new(AtomicBool::new(false)),
            crashed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Crashes once `bytes` bytes have been written in total.
    pub fn crash_after(&self, bytes: usize) {
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Makes every flush fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Whether a simulated crash happened.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// The bytes that reached storage.
    pub fn surviving_data(&self) -> Vec<u8> {
        self.inner.data()
    }

    fn crash(&self, message: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::other(message.to_string()))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let current = self.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        let threshold = self.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            return Err(self.crash("simulated crash during write"));
        }
        if current + data.len() > threshold {
            let partial = threshold - current;
            let _ = self.inner.append(&data[..partial]);
            return Err(self.crash("simulated crash during partial write"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.crash("simulated crash during flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.crash("simulated crash during sync"));
        }
        self.inner.sync()
    }
}

/// Entry logged every cycle by the harness.
const COUNTER_ENTRY: &str = "/Counter";
/// The same entry as a table key.
const COUNTER_KEY: &str = "Counter";

/// Writes a known run of cycles and checks recovery after a crash.
///
/// Cycle `n` is stamped `(n + 1) * 20_000` and logs `/Counter = n`.
pub struct CrashRecoveryHarness {
    cycles: usize,
}

impl CrashRecoveryHarness {
    /// A harness that tries to write `cycles` cycles.
    pub fn new(cycles: usize) -> Self {
        Self { cycles }
    }

    fn timestamp(cycle: usize) -> i64 {
        (i64::try_from(cycle).unwrap_or(i64::MAX) + 1) * 20_000
    }

    /// Writes cycles to `backend` one flush per cycle until a write fails.
    /// Flushes start failing at cycle `fail_flush_at`, if given.
    ///
    /// Returns the number of cycles that were flushed.
    fn write_until_crash(&self, backend: &CrashableBackend, fail_flush_at: Option<usize>) -> usize {
        let Ok(mut writer) = LogFileWriter::new(Box::new(backend.clone()), EXTRA_HEADER) else {
            return 0;
        };
        let entries = writer
            .start(TIMESTAMP_KEY, "int64", &entry_metadata(None), 0)
            .and_then(|ts| {
                writer
                    .start(COUNTER_ENTRY, "int64", &entry_metadata(None), 0)
                    .map(|counter| (ts, counter))
            });
        let Ok((ts_entry, counter_entry)) = entries else {
            return 0;
        };
        if writer.flush().is_err() {
            return 0;
        }

        for cycle in 0..self.cycles {
            if fail_flush_at == Some(cycle) {
                backend.set_fail_on_flush(true);
            }
            let timestamp = Self::timestamp(cycle);
            let counter = i64::try_from(cycle).unwrap_or(i64::MAX);
            let written = writer
                .append(ts_entry, &Value::Integer(timestamp), timestamp)
                .and_then(|()| writer.append(counter_entry, &Value::Integer(counter), timestamp))
                .and_then(|()| writer.flush());
            if written.is_err() {
                return cycle;
            }
        }
        self.cycles
    }

    /// Replays `data` and returns each cycle's timestamp and `/Counter`
    /// value, or `None` for a cycle whose counter was lost.
    pub fn replay(data: Vec<u8>) -> Vec<(i64, Option<i64>)> {
        let mut reader = WpilogReader::from_backend(Box::new(InMemoryBackend::with_data(data)));
        if reader.start().is_err() {
            return Vec::new();
        }
        let mut cycles = Vec::new();
        loop {
            let table = LogTable::new(0);
            if !reader.update_table(&table) {
                break;
            }
            let counter = table
                .contains(COUNTER_KEY)
                .then(|| table.get(COUNTER_KEY, -1i64));
            cycles.push((table.timestamp(), counter));
        }
        cycles
    }

    fn check(&self, description: String, backend: &CrashableBackend, flushed: usize) -> CrashRecoveryResult {
        let replayed = Self::replay(backend.surviving_data());

        // Every flushed cycle must come back intact. The torn cycle may
        // show up too, possibly without its counter.
        let intact = replayed
            .iter()
            .take(flushed)
            .enumerate()
            .all(|(cycle, (timestamp, counter))| {
                *timestamp == Self::timestamp(cycle)
                    && *counter == Some(i64::try_from(cycle).unwrap_or(i64::MAX))
            });
        let count_ok = replayed.len() == flushed || replayed.len() == flushed + 1;
        let passed = intact && count_ok && flushed <= self.cycles;
        let description = if passed {
            description
        } else {
            format!("{description}: flushed {flushed} cycles, replayed {replayed:?}")
        };
        CrashRecoveryResult {
            passed,
            description,
            flushed_cycles: flushed,
            replayed_cycles: replayed.len(),
        }
    }

    /// Crashes after `bytes` bytes reach storage.
    pub fn crash_after_bytes(&self, bytes: usize) -> CrashRecoveryResult {
        let backend = CrashableBackend::new(InMemoryBackend::new());
        backend.crash_after(bytes);
        let flushed = self.write_until_crash(&backend, None);
        self.check(format!("crash after {bytes} bytes"), &backend, flushed)
    }

    /// Makes flushes fail from cycle `cycle` on.
    pub fn flush_failure_at(&self, cycle: usize) -> CrashRecoveryResult {
        let backend = CrashableBackend::new(InMemoryBackend::new());
        let flushed = self.write_until_crash(&backend, Some(cycle));
        self.check(format!("flush failure at cycle {cycle}"), &backend, flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_log_replays_every_cycle() {
        let result = CrashRecoveryHarness::new(5).crash_after_bytes(usize::MAX);
        assert!(result.passed, "{}", result.description);
        assert_eq!(result.flushed_cycles, 5);
        assert_eq!(result.replayed_cycles, 5);
    }

    #[test]
    fn crash_at_every_byte_keeps_flushed_cycles() {
        let harness = CrashRecoveryHarness::new(6);
        for bytes in 0..400 {
            let result = harness.crash_after_bytes(bytes);
            assert!(result.passed, "{}", result.description);
        }
    }

    #[test]
    fn crash_inside_header_replays_nothing() {
        let result = CrashRecoveryHarness::new(3).crash_after_bytes(10);
        assert!(result.passed, "{}", result.description);
        assert_eq!(result.flushed_cycles, 0);
        assert_eq!(result.replayed_cycles, 0);
    }

    #[test]
    fn flush_failure_keeps_earlier_cycles() {
        let result = CrashRecoveryHarness::new(8).flush_failure_at(3);
        assert!(result.passed, "{}", result.description);
        assert_eq!(result.flushed_cycles, 3);
        // The failing cycle's bytes were appended before the flush failed.
        assert_eq!(result.replayed_cycles, 4);
    }

    #[test]
    fn backend_tracks_crash() {
        let mut backend = CrashableBackend::new(InMemoryBackend::new());
        backend.crash_after(4);
        backend.append(b"ab").unwrap();
        assert!(!backend.has_crashed());
        assert!(backend.append(b"cdef").is_err());
        assert!(backend.has_crashed());
        assert_eq!(backend.surviving_data(), b"abcd");
        assert!(backend.append(b"g").is_err());
    }
}
