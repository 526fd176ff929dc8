//! Cross-crate integration helpers.
//!
//! Drives a [`Logger`] through a capture run into a real WPILOG file and
//! back through a replay run, the same way a robot program would.

use replaykit_codec::{LoggableType, Value};
use replaykit_core::wpilog::{ControlRecord, LogFileReader};
use replaykit_core::{
    LogDataReceiver, LogReplaySource, LogTable, LoggableInputs, Logger, LoggerConfig, ManualClock,
    WpilogReader, WpilogWriter, WpilogWriterConfig, TIMESTAMP_KEY,
};
use replaykit_storage::FileBackend;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Cycle period used by the harness clock, in microseconds.
pub const CYCLE_MICROS: i64 = 20_000;

/// Key the harness logs inputs under.
pub const INPUTS_KEY: &str = "Inputs";

/// Runs one capture cycle per state and writes the log to `path`.
///
/// Returns the cycle timestamps.
pub fn capture_to_file<I: LoggableInputs + Clone>(path: &Path, states: &[I]) -> Vec<i64> {
    let clock = ManualClock::new(CYCLE_MICROS);
    let mut logger = Logger::with_clock(LoggerConfig::default(), Arc::new(clock.clone()));
    logger.add_data_receiver(WpilogWriter::new(WpilogWriterConfig::new(path)));
    logger.start().expect("Failed to start capture");

    let mut timestamps = Vec::with_capacity(states.len());
    for state in states {
        timestamps.push(logger.timestamp());
        let mut inputs = state.clone();
        logger.process_inputs(INPUTS_KEY, &mut inputs);
        logger.periodic_after_user(0, 0);
        clock.advance(CYCLE_MICROS);
        logger.periodic_before_user();
    }
    logger.end().expect("Failed to end capture");
    timestamps
}

/// Replays the log at `path`, restoring one `I` per cycle.
pub fn replay_from_file<I: LoggableInputs + Default>(path: &Path) -> Vec<(i64, I)> {
    let mut logger = Logger::new(LoggerConfig::default());
    logger.set_replay_source(WpilogReader::new(path));
    logger.start().expect("Failed to start replay");

    let mut restored = Vec::new();
    while logger.is_running() {
        let mut inputs = I::default();
        logger.process_inputs(INPUTS_KEY, &mut inputs);
        restored.push((logger.timestamp(), inputs));
        logger.periodic_after_user(0, 0);
        logger.periodic_before_user();
    }
    logger.end().expect("Failed to end replay");
    restored
}

/// Captures `states` to a temporary file and replays them.
pub fn capture_then_replay<I>(states: &[I]) -> Vec<I>
where
    I: LoggableInputs + Clone + Default,
{
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let path = dir.path().join("capture.wpilog");
    capture_to_file(&path, states);
    replay_from_file::<I>(&path)
        .into_iter()
        .map(|(_, inputs)| inputs)
        .collect()
}

/// Writes prepared cycles straight into a [`WpilogWriter`].
///
/// Keys are relative to the table root.
pub fn write_cycles(path: &Path, cycles: &[(i64, BTreeMap<String, Value>)]) {
    let mut writer = WpilogWriter::new(WpilogWriterConfig::new(path));
    writer.start().expect("Failed to start writer");
    let table = LogTable::new(0);
    for (timestamp, fields) in cycles {
        table.set_timestamp(*timestamp);
        for (key, value) in fields {
            table.put(key, value);
        }
        writer
            .put_table(&table.snapshot())
            .expect("Failed to write cycle");
    }
    writer.end().expect("Failed to end writer");
}

/// Replays the log at `path` into a fresh table and returns the table
/// contents after each cycle, with keys relative to the root.
pub fn read_cycles(path: &Path) -> Vec<(i64, BTreeMap<String, Value>)> {
    let mut reader = WpilogReader::new(path);
    reader.start().expect("Failed to open log");
    let table = LogTable::new(0);
    let mut cycles = Vec::new();
    while reader.update_table(&table) {
        let fields = table
            .get_all(false)
            .into_iter()
            .map(|(key, value)| {
                let key = key.strip_prefix('/').unwrap_or(&key).to_string();
                (key, value.value().clone())
            })
            .collect();
        cycles.push((table.timestamp(), fields));
    }
    reader.end();
    cycles
}

/// Names of the data records appended at each timestamp, excluding
/// `/Timestamp`.
pub fn appends_by_timestamp(path: &Path) -> BTreeMap<i64, Vec<String>> {
    let backend = FileBackend::open_read_only(path).expect("Failed to open log");
    let reader = LogFileReader::open(Box::new(backend)).expect("Invalid log header");
    let mut names: HashMap<u32, String> = HashMap::new();
    let mut appends: BTreeMap<i64, Vec<String>> = BTreeMap::new();

    for item in reader.records() {
        let (_, record) = item.expect("Failed to read record");
        if record.is_control() {
            if let ControlRecord::Start { entry, name, .. } =
                record.as_control().expect("Invalid control record")
            {
                names.insert(entry, name);
            }
            continue;
        }
        let name = names
            .get(&record.entry)
            .cloned()
            .unwrap_or_else(|| format!("<entry {}>", record.entry));
        let list = appends.entry(record.timestamp).or_default();
        if name != TIMESTAMP_KEY {
            list.push(name);
        }
    }
    appends
}

/// Decodes every `/Timestamp` append of the log at `path`.
pub fn logged_timestamps(path: &Path) -> Vec<i64> {
    let backend = FileBackend::open_read_only(path).expect("Failed to open log");
    let reader = LogFileReader::open(Box::new(backend)).expect("Invalid log header");
    let mut timestamp_entry = None;
    let mut timestamps = Vec::new();
    for item in reader.records() {
        let (_, record) = item.expect("Failed to read record");
        if record.is_control() {
            if let ControlRecord::Start { entry, name, .. } =
                record.as_control().expect("Invalid control record")
            {
                if name == TIMESTAMP_KEY {
                    timestamp_entry = Some(entry);
                }
            }
        } else if Some(record.entry) == timestamp_entry {
            let value = record
                .value(LoggableType::Integer)
                .expect("Invalid timestamp payload");
            timestamps.push(value.as_integer().unwrap_or_default());
        }
    }
    timestamps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::cycles_strategy;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct DriveInputs {
        left_meters: f64,
        right_meters: f64,
        gyro_connected: bool,
        module_states: Vec<f64>,
        mode: String,
    }

    impl LoggableInputs for DriveInputs {
        fn to_log(&self, table: &LogTable) {
            table.put("LeftMeters", &self.left_meters);
            table.put("RightMeters", &self.right_meters);
            table.put("GyroConnected", &self.gyro_connected);
            table.put("ModuleStates", self.module_states.as_slice());
            table.put("Mode", self.mode.as_str());
        }

        fn from_log(&mut self, table: &LogTable) {
            self.left_meters = table.get("LeftMeters", self.left_meters);
            self.right_meters = table.get("RightMeters", self.right_meters);
            self.gyro_connected = table.get("GyroConnected", self.gyro_connected);
            self.module_states = table.get("ModuleStates", self.module_states.clone());
            self.mode = table.get("Mode", self.mode.clone());
        }
    }

    /// Reads a key the capture run never wrote.
    #[derive(Debug, Clone, PartialEq)]
    struct LateSensor {
        reading: i64,
    }

    impl Default for LateSensor {
        fn default() -> Self {
            Self { reading: -1 }
        }
    }

    impl LoggableInputs for LateSensor {
        fn to_log(&self, _table: &LogTable) {}

        fn from_log(&mut self, table: &LogTable) {
            self.reading = table.get("Reading", self.reading);
        }
    }

    fn drive(left: f64, connected: bool) -> DriveInputs {
        DriveInputs {
            left_meters: left,
            right_meters: -left,
            gyro_connected: connected,
            module_states: vec![left, left * 2.0],
            mode: if connected { "auto".into() } else { "disabled".into() },
        }
    }

    #[test]
    fn replay_restores_every_cycle() {
        let states = vec![
            drive(0.0, false),
            drive(0.0, false),
            drive(0.5, true),
            drive(1.25, true),
            drive(1.25, true),
        ];
        assert_eq!(capture_then_replay(&states), states);
    }

    #[test]
    fn replay_uses_logged_timestamps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("timed.wpilog");
        let states = vec![drive(0.1, true), drive(0.2, true), drive(0.3, true)];
        let captured = capture_to_file(&path, &states);
        assert_eq!(captured, vec![20_000, 40_000, 60_000]);
        assert_eq!(logged_timestamps(&path), captured);

        let replayed: Vec<i64> = replay_from_file::<DriveInputs>(&path)
            .into_iter()
            .map(|(timestamp, _)| timestamp)
            .collect();
        assert_eq!(replayed, captured);
    }

    #[test]
    fn unknown_keys_keep_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("defaults.wpilog");
        capture_to_file(&path, &[drive(1.0, true), drive(2.0, true)]);

        let replayed = replay_from_file::<LateSensor>(&path);
        assert_eq!(replayed.len(), 2);
        assert!(replayed.iter().all(|(_, sensor)| sensor.reading == -1));
    }

    #[test]
    fn unchanged_fields_are_not_appended() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("delta.wpilog");
        capture_to_file(&path, &[drive(0.5, true), drive(0.5, true), drive(0.75, true)]);

        let appends = appends_by_timestamp(&path);
        let inputs_at = |ts: i64| -> Vec<String> {
            appends[&ts]
                .iter()
                .filter(|name| name.starts_with("/Inputs/"))
                .cloned()
                .collect()
        };
        assert_eq!(inputs_at(20_000).len(), 5);
        assert!(inputs_at(40_000).is_empty());
        assert_eq!(
            inputs_at(60_000),
            vec!["/Inputs/LeftMeters", "/Inputs/ModuleStates", "/Inputs/RightMeters"]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn replayed_table_matches_written_cycles(cycles in cycles_strategy(6)) {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("prop.wpilog");
            write_cycles(&path, &cycles);
            prop_assert_eq!(read_cycles(&path), cycles);
        }

        #[test]
        fn repeating_a_cycle_appends_nothing(cycles in cycles_strategy(1)) {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("repeat.wpilog");
            let (timestamp, fields) = cycles[0].clone();
            write_cycles(&path, &[(timestamp, fields.clone()), (timestamp + 1, fields.clone())]);

            let appends = appends_by_timestamp(&path);
            prop_assert_eq!(appends[&timestamp].len(), fields.len());
            prop_assert!(appends.get(&(timestamp + 1)).map_or(true, Vec::is_empty));
        }

        #[test]
        fn a_single_change_appends_once(cycles in cycles_strategy(1)) {
            let (timestamp, fields) = cycles[0].clone();
            prop_assume!(!fields.is_empty());
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("change.wpilog");

            let changed_key = fields.keys().next().cloned().unwrap();
            let mut changed = fields.clone();
            let bumped = match &fields[&changed_key] {
                Value::Integer(v) => Value::Integer(v.wrapping_add(1)),
                Value::Boolean(v) => Value::Boolean(!v),
                Value::String(s) => Value::String(format!("{s}!")),
                Value::Raw(b) => Value::Raw([b.as_slice(), &[0]].concat()),
                Value::Float(v) => Value::Float(v + 1.0),
                Value::Double(v) => Value::Double(v + 1.0),
                Value::BooleanArray(v) => Value::BooleanArray([v.as_slice(), &[true]].concat()),
                Value::IntegerArray(v) => Value::IntegerArray([v.as_slice(), &[0]].concat()),
                Value::FloatArray(v) => Value::FloatArray([v.as_slice(), &[0.0]].concat()),
                Value::DoubleArray(v) => Value::DoubleArray([v.as_slice(), &[0.0]].concat()),
                Value::StringArray(v) => {
                    Value::StringArray([v.as_slice(), &[String::new()]].concat())
                }
            };
            changed.insert(changed_key.clone(), bumped);
            write_cycles(&path, &[(timestamp, fields), (timestamp + 1, changed)]);

            let appends = appends_by_timestamp(&path);
            prop_assert_eq!(
                appends[&(timestamp + 1)].clone(),
                vec![format!("/{changed_key}")]
            );
        }
    }
}
