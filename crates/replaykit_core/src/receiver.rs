//! Sink and replay source contracts.

use crate::error::CoreResult;
use crate::table::LogTable;

/// Key of the per-cycle timestamp entry in log files.
pub const TIMESTAMP_KEY: &str = "/Timestamp";

/// A consumer of cycle snapshots.
///
/// Receivers run on the dispatch thread and are never called concurrently.
/// Returned errors are logged by the dispatcher and do not stop delivery;
/// receivers that write files are expected to handle ordinary I/O failures
/// themselves.
pub trait LogDataReceiver: Send {
    /// Called once before the first snapshot.
    fn start(&mut self) -> CoreResult<()> {
        Ok(())
    }

    /// Called for every snapshot, in cycle order.
    fn put_table(&mut self, table: &LogTable) -> CoreResult<()>;

    /// Called once after the last snapshot.
    fn end(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

/// A source of previously captured cycles.
pub trait LogReplaySource: Send {
    /// Opens the source.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened or is not a valid log.
    fn start(&mut self) -> CoreResult<()>;

    /// Closes the source.
    fn end(&mut self) {}

    /// Loads the next cycle into `table`, including its timestamp.
    ///
    /// Returns false once no more cycles are available.
    fn update_table(&mut self, table: &LogTable) -> bool;
}
