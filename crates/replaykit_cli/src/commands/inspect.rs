//! Inspect command implementation.

use super::{open_log, OutputFormat};
use replaykit_core::wpilog::{ControlRecord, LogFileReader};
use replaykit_core::TIMESTAMP_KEY;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log file path.
    pub path: String,
    /// Format version, as `major.minor`.
    pub version: String,
    /// Extra header string.
    pub extra_header: String,
    /// Total number of records.
    pub record_count: usize,
    /// Number of control records.
    pub control_count: usize,
    /// Number of `/Timestamp` appends.
    pub cycle_count: usize,
    /// First cycle timestamp in microseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_timestamp: Option<i64>,
    /// Last cycle timestamp in microseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<i64>,
    /// Entries in start order.
    pub entries: Vec<EntryInfo>,
    /// Error that stopped the scan early, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One entry of the log.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Entry id.
    pub id: u32,
    /// Entry name.
    pub name: String,
    /// WPILOG type string.
    #[serde(rename = "type")]
    pub type_string: String,
    /// Latest metadata.
    pub metadata: String,
    /// Number of data records.
    pub records: usize,
    /// Whether the entry was finished.
    pub finished: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let reader = open_log(path)?;
    let result = inspect(path, reader);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text_output(&result),
    }
    Ok(())
}

/// Scans every record of `reader`.
pub fn inspect(path: &Path, reader: LogFileReader) -> InspectResult {
    let mut result = InspectResult {
        path: path.display().to_string(),
        version: format!("{}.{}", reader.version() >> 8, reader.version() & 0xff),
        extra_header: reader.extra_header().to_string(),
        record_count: 0,
        control_count: 0,
        cycle_count: 0,
        first_timestamp: None,
        last_timestamp: None,
        entries: Vec::new(),
        error: None,
    };
    // Entry id -> index into `result.entries`.
    let mut index: BTreeMap<u32, usize> = BTreeMap::new();

    for item in reader.records() {
        let (offset, record) = match item {
            Ok(item) => item,
            Err(err) => {
                result.error = Some(err.to_string());
                break;
            }
        };
        result.record_count += 1;

        if record.is_control() {
            result.control_count += 1;
            match record.as_control() {
                Ok(ControlRecord::Start {
                    entry,
                    name,
                    type_string,
                    metadata,
                }) => {
                    index.insert(entry, result.entries.len());
                    result.entries.push(EntryInfo {
                        id: entry,
                        name,
                        type_string,
                        metadata,
                        records: 0,
                        finished: false,
                    });
                }
                Ok(ControlRecord::Finish { entry }) => {
                    if let Some(&i) = index.get(&entry) {
                        result.entries[i].finished = true;
                    }
                }
                Ok(ControlRecord::SetMetadata { entry, metadata }) => {
                    if let Some(&i) = index.get(&entry) {
                        result.entries[i].metadata = metadata;
                    }
                }
                Err(err) => {
                    result.error = Some(format!("offset {offset}: {err}"));
                    break;
                }
            }
            continue;
        }

        let Some(&i) = index.get(&record.entry) else {
            continue;
        };
        let entry = &mut result.entries[i];
        entry.records += 1;
        if entry.name == TIMESTAMP_KEY {
            result.cycle_count += 1;
            result.first_timestamp.get_or_insert(record.timestamp);
            result.last_timestamp = Some(record.timestamp);
        }
    }

    result
}

fn print_text_output(result: &InspectResult) {
    println!("WPILOG Inspection");
    println!("=================");
    println!();
    println!("Path:         {}", result.path);
    println!("Version:      {}", result.version);
    println!("Extra header: {}", result.extra_header);
    println!();
    println!("Records:");
    println!("  Total:   {}", result.record_count);
    println!("  Control: {}", result.control_count);
    println!("  Cycles:  {}", result.cycle_count);
    if let (Some(first), Some(last)) = (result.first_timestamp, result.last_timestamp) {
        println!("  Span:    {} s", format_seconds(last - first));
    }
    println!();
    println!("Entries:");
    for entry in &result.entries {
        let finished = if entry.finished { " (finished)" } else { "" };
        println!(
            "  [{}] {} : {} ({} records){finished}",
            entry.id, entry.name, entry.type_string, entry.records
        );
        if !entry.metadata.is_empty() {
            println!("        {}", entry.metadata);
        }
    }
    if let Some(error) = &result.error {
        println!();
        println!("Scan stopped early: {error}");
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_seconds(micros: i64) -> String {
    format!("{:.3}", micros as f64 / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaykit_core::{LogDataReceiver, LogTable, WpilogWriter, WpilogWriterConfig};
    use tempfile::TempDir;

    #[test]
    fn counts_entries_and_cycles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.wpilog");
        let mut writer = WpilogWriter::new(WpilogWriterConfig::new(&path));
        writer.start().unwrap();
        let table = LogTable::new(1_000);
        table.put_with_unit("Arm/Angle", &0.5f64, "radians");
        writer.put_table(&table.snapshot()).unwrap();
        table.set_timestamp(21_000);
        table.put_with_unit("Arm/Angle", &0.75f64, "radians");
        writer.put_table(&table.snapshot()).unwrap();
        writer.end().unwrap();

        let result = inspect(&path, open_log(&path).unwrap());
        assert_eq!(result.version, "1.0");
        assert_eq!(result.extra_header, "AdvantageKit");
        assert_eq!(result.cycle_count, 2);
        assert_eq!(result.first_timestamp, Some(1_000));
        assert_eq!(result.last_timestamp, Some(21_000));
        assert_eq!(result.control_count, 2);
        assert_eq!(result.record_count, 6);
        assert!(result.error.is_none());

        let angle = &result.entries[1];
        assert_eq!(angle.name, "/Arm/Angle");
        assert_eq!(angle.type_string, "double");
        assert_eq!(angle.records, 2);
        assert!(angle.metadata.contains("radians"));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["entries"][0]["type"], "int64");
    }
}
