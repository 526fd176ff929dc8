//! Property-based generators for log values and tables.

use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use replaykit_codec::{LogValue, Value};
use std::collections::BTreeMap;

/// Generates a key path such as `Drive/LeftVelocity`.
pub fn key_strategy() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{0,6}(/[A-Z][a-z]{0,6}){0,2}"
}

/// Generates a finite `f64`.
pub fn finite_f64() -> impl Strategy<Value = f64> {
    -1.0e6f64..1.0e6f64
}

/// Generates a finite `f32`.
pub fn finite_f32() -> impl Strategy<Value = f32> {
    -1.0e4f32..1.0e4f32
}

/// Generates a value of any log type.
///
/// Floating point values are finite so that equality holds after a round
/// trip through a log file.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        vec(any::<u8>(), 0..16).prop_map(Value::Raw),
        any::<bool>().prop_map(Value::Boolean),
        any::<i64>().prop_map(Value::Integer),
        finite_f32().prop_map(Value::Float),
        finite_f64().prop_map(Value::Double),
        "[ -~]{0,24}".prop_map(Value::String),
        vec(any::<bool>(), 0..8).prop_map(Value::BooleanArray),
        vec(any::<i64>(), 0..8).prop_map(Value::IntegerArray),
        vec(finite_f32(), 0..8).prop_map(Value::FloatArray),
        vec(finite_f64(), 0..8).prop_map(Value::DoubleArray),
        vec("[a-z]{0,8}", 0..6).prop_map(Value::StringArray),
    ]
}

/// Generates a value with an optional unit.
pub fn log_value_strategy() -> impl Strategy<Value = LogValue> {
    (
        value_strategy(),
        prop::option::of(prop_oneof![Just("meters"), Just("radians"), Just("volts")]),
    )
        .prop_map(|(value, unit)| match unit {
            Some(unit) => LogValue::new(value).with_unit(unit),
            None => LogValue::new(value),
        })
}

/// Generates the fields of one cycle.
///
/// Keys are prefixed so they never collide with `Timestamp`.
pub fn table_fields_strategy(
    max_fields: usize,
) -> impl Strategy<Value = BTreeMap<String, Value>> {
    btree_map(
        key_strategy().prop_map(|key| format!("Inputs/{key}")),
        value_strategy(),
        0..=max_fields,
    )
}

/// Generates a sequence of cycles with strictly increasing timestamps.
///
/// Every cycle logs the same keys with a stable type per key, as a real
/// control loop does.
pub fn cycles_strategy(
    max_cycles: usize,
) -> impl Strategy<Value = Vec<(i64, BTreeMap<String, Value>)>> {
    (table_fields_strategy(6), 1..=max_cycles).prop_flat_map(|(template, count)| {
        let per_cycle: Vec<_> = template
            .values()
            .map(|value| same_type_strategy(value).boxed())
            .collect();
        let keys: Vec<String> = template.keys().cloned().collect();
        (
            vec(1_000i64..50_000, count),
            vec(per_cycle, count),
        )
            .prop_map(move |(deltas, values)| {
                let mut timestamp = 0i64;
                deltas
                    .into_iter()
                    .zip(values)
                    .map(|(delta, values)| {
                        timestamp += delta;
                        let fields = keys.iter().cloned().zip(values).collect();
                        (timestamp, fields)
                    })
                    .collect()
            })
    })
}

/// Generates values of the same type as `value`.
pub fn same_type_strategy(value: &Value) -> BoxedStrategy<Value> {
    match value {
        Value::Raw(_) => vec(any::<u8>(), 0..16).prop_map(Value::Raw).boxed(),
        Value::Boolean(_) => any::<bool>().prop_map(Value::Boolean).boxed(),
        Value::Integer(_) => any::<i64>().prop_map(Value::Integer).boxed(),
        Value::Float(_) => finite_f32().prop_map(Value::Float).boxed(),
        Value::Double(_) => finite_f64().prop_map(Value::Double).boxed(),
        Value::String(_) => "[ -~]{0,24}".prop_map(Value::String).boxed(),
        Value::BooleanArray(_) => vec(any::<bool>(), 0..8).prop_map(Value::BooleanArray).boxed(),
        Value::IntegerArray(_) => vec(any::<i64>(), 0..8).prop_map(Value::IntegerArray).boxed(),
        Value::FloatArray(_) => vec(finite_f32(), 0..8).prop_map(Value::FloatArray).boxed(),
        Value::DoubleArray(_) => vec(finite_f64(), 0..8).prop_map(Value::DoubleArray).boxed(),
        Value::StringArray(_) => vec("[a-z]{0,8}", 0..6).prop_map(Value::StringArray).boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn keys_are_relative_paths(key in key_strategy()) {
            prop_assert!(!key.starts_with('/'));
            prop_assert!(!key.ends_with('/'));
            prop_assert!(!key.contains("//"));
        }

        #[test]
        fn cycles_keep_types_and_order(cycles in cycles_strategy(8)) {
            let first = &cycles[0].1;
            for window in cycles.windows(2) {
                prop_assert!(window[0].0 < window[1].0);
            }
            for (_, fields) in &cycles {
                prop_assert_eq!(fields.len(), first.len());
                for (key, value) in fields {
                    prop_assert_eq!(value.loggable_type(), first[key].loggable_type());
                }
            }
        }
    }
}
