//! Dump command implementation.

use super::{open_log, value_to_json, OutputFormat};
use replaykit_codec::LoggableType;
use replaykit_core::wpilog::{ControlRecord, LogFileReader};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// A decoded data record.
#[derive(Debug, Serialize)]
pub struct DataRecordInfo {
    /// Offset in the log file.
    pub offset: u64,
    /// Timestamp in microseconds.
    pub timestamp: i64,
    /// Entry id.
    pub entry: u32,
    /// Entry name.
    pub name: String,
    /// WPILOG type string.
    #[serde(rename = "type")]
    pub type_string: String,
    /// Decoded value, or null if the payload did not decode.
    pub value: serde_json::Value,
    /// Text form of the value.
    #[serde(skip)]
    pub display: String,
}

/// Options for [`read_data_records`].
#[derive(Debug, Default, Clone)]
pub struct DumpFilter {
    /// Only records of this entry. A leading `/` is optional.
    pub entry: Option<String>,
    /// Maximum number of records.
    pub limit: Option<usize>,
}

impl DumpFilter {
    fn matches(&self, name: &str) -> bool {
        match &self.entry {
            None => true,
            Some(wanted) => {
                name == wanted || name.strip_prefix('/') == Some(wanted.as_str())
            }
        }
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    filter: &DumpFilter,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let reader = open_log(path)?;
    let records = read_data_records(reader, filter)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text => print_text_output(&records),
    }
    Ok(())
}

/// Decodes the data records of `reader` that pass `filter`.
pub fn read_data_records(
    reader: LogFileReader,
    filter: &DumpFilter,
) -> Result<Vec<DataRecordInfo>, Box<dyn std::error::Error>> {
    let max_records = filter.limit.unwrap_or(usize::MAX);
    let mut entries: HashMap<u32, (String, String)> = HashMap::new();
    let mut records = Vec::new();

    for item in reader.records() {
        if records.len() >= max_records {
            break;
        }
        let (offset, record) = item?;

        if record.is_control() {
            if let ControlRecord::Start {
                entry,
                name,
                type_string,
                ..
            } = record.as_control()?
            {
                entries.insert(entry, (name, type_string));
            }
            continue;
        }

        let Some((name, type_string)) = entries.get(&record.entry) else {
            tracing::debug!(offset, entry = record.entry, "data record for unknown entry");
            continue;
        };
        if !filter.matches(name) {
            continue;
        }

        let (value, display) = match record.value(LoggableType::from_wpilog_type(type_string)) {
            Ok(value) => (value_to_json(&value), value.to_string()),
            Err(err) => {
                tracing::warn!(offset, name = %name, error = %err, "payload did not decode");
                (serde_json::Value::Null, format!("<{} bytes>", record.payload.len()))
            }
        };
        records.push(DataRecordInfo {
            offset,
            timestamp: record.timestamp,
            entry: record.entry,
            name: name.clone(),
            type_string: type_string.clone(),
            value,
            display,
        });
    }

    Ok(records)
}

fn print_text_output(records: &[DataRecordInfo]) {
    for record in records {
        println!(
            "{:>12}  {} [{}] = {}",
            record.timestamp, record.name, record.type_string, record.display
        );
    }
    println!();
    println!("{} records", records.len());
}
