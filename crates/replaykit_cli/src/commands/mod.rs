//! CLI command implementations.

pub mod dump;
pub mod inspect;

use clap::ValueEnum;
use replaykit_codec::Value;
use replaykit_core::wpilog::LogFileReader;
use replaykit_storage::FileBackend;
use std::path::Path;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens a log file read-only and validates its header.
pub fn open_log(path: &Path) -> Result<LogFileReader, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No log file found at {}", path.display()).into());
    }
    let backend = FileBackend::open_read_only(path)?;
    Ok(LogFileReader::open(Box::new(backend))?)
}

/// Converts a decoded value to JSON. Raw bytes become a hex string.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::json;

    match value {
        Value::Raw(bytes) => json!(bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()),
        Value::Boolean(v) => json!(v),
        Value::Integer(v) => json!(v),
        Value::Float(v) => json!(v),
        Value::Double(v) => json!(v),
        Value::String(v) => json!(v),
        Value::BooleanArray(v) => json!(v),
        Value::IntegerArray(v) => json!(v),
        Value::FloatArray(v) => json!(v),
        Value::DoubleArray(v) => json!(v),
        Value::StringArray(v) => json!(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_values() {
        assert_eq!(value_to_json(&Value::Raw(vec![0x0a, 0xff])), json_str("0aff"));
        assert_eq!(value_to_json(&Value::Integer(-3)), serde_json::json!(-3));
        assert_eq!(
            value_to_json(&Value::StringArray(vec!["a".into(), "b".into()])),
            serde_json::json!(["a", "b"])
        );
        // Non-finite floats have no JSON form.
        assert_eq!(value_to_json(&Value::Double(f64::NAN)), serde_json::Value::Null);
    }

    fn json_str(s: &str) -> serde_json::Value {
        serde_json::Value::String(s.to_string())
    }

    #[test]
    fn missing_file_is_reported() {
        let err = open_log(Path::new("/definitely/not/here.wpilog")).unwrap_err();
        assert!(err.to_string().contains("No log file found"));
    }
}
