//! WPILOG file format support.
//!
//! - [`record`]: record layout and payload encoding
//! - [`LogFileWriter`] / [`LogFileReader`]: low-level record I/O over a
//!   storage backend
//! - [`WpilogWriter`]: a [`LogDataReceiver`](crate::LogDataReceiver) that
//!   writes delta-encoded cycles
//! - [`WpilogReader`]: a [`LogReplaySource`](crate::LogReplaySource) that
//!   reads them back one cycle at a time

pub mod record;
mod reader;
mod replay;
mod sink;
mod writer;

pub use reader::{LogFileReader, WpilogRecordIterator};
pub use record::{ControlRecord, WpilogRecord};
pub(crate) use replay::keeps_custom_type;
pub use replay::WpilogReader;
pub use sink::{WpilogWriter, WpilogWriterConfig};
pub use writer::LogFileWriter;

/// Extra header identifying logs written by this crate.
pub const EXTRA_HEADER: &str = "AdvantageKit";

/// File extension of log files.
pub const LOG_EXTENSION: &str = "wpilog";

/// Metadata JSON for an entry, with the unit if it has one.
#[must_use]
pub fn entry_metadata(unit: Option<&str>) -> String {
    match unit {
        Some(unit) => serde_json::json!({ "source": EXTRA_HEADER, "unit": unit }),
        None => serde_json::json!({ "source": EXTRA_HEADER }),
    }
    .to_string()
}
