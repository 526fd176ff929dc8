//! Log tables: prefix-scoped views over one cycle's key/value store.

use crate::config::DEFAULT_MAX_TABLE_DEPTH;
use crate::inputs::LoggableInputs;
use parking_lot::RwLock;
use replaykit_codec::{
    collect_schemas, schema_key, CodecResult, FromValue, LogEnum, LogValue, Loggable,
    StructCodec, StructRegistry, StructSerializable, Value, SCHEMA_CUSTOM_TYPE,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

type FieldMap = BTreeMap<String, Arc<LogValue>>;

/// A table of logged values.
///
/// A table is a view: a prefix over a map shared with its parent and
/// siblings, a shared timestamp cell and the owning logger's struct
/// registry. [`subtable`](LogTable::subtable) creates another view over the
/// same data; [`snapshot`](LogTable::snapshot) copies the map for hand-off to
/// the sinks.
///
/// Keys are written as `prefix + key`. The root prefix is `/`.
///
/// A key keeps the type of its first value. Writes of a different type (or
/// a different custom type) are dropped with a warning.
pub struct LogTable {
    data: Arc<RwLock<FieldMap>>,
    prefix: String,
    depth: usize,
    max_depth: usize,
    timestamp: Arc<AtomicI64>,
    registry: Arc<StructRegistry>,
}

impl LogTable {
    /// Creates an empty root table.
    #[must_use]
    pub fn new(timestamp: i64) -> Self {
        Self::with_registry(timestamp, Arc::new(StructRegistry::new()))
    }

    /// Creates an empty root table sharing an existing struct registry.
    #[must_use]
    pub fn with_registry(timestamp: i64, registry: Arc<StructRegistry>) -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            prefix: "/".to_string(),
            depth: 0,
            max_depth: DEFAULT_MAX_TABLE_DEPTH,
            timestamp: Arc::new(AtomicI64::new(timestamp)),
            registry,
        }
    }

    /// Sets the depth beyond which [`put_inputs`](LogTable::put_inputs) is
    /// refused.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Returns a view of `name` below this table.
    #[must_use]
    pub fn subtable(&self, name: &str) -> LogTable {
        LogTable {
            data: Arc::clone(&self.data),
            prefix: format!("{}{name}/", self.prefix),
            depth: self.depth + 1,
            max_depth: self.max_depth,
            timestamp: Arc::clone(&self.timestamp),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Copies this table.
    ///
    /// The copy has its own map and timestamp cell; values themselves are
    /// immutable and shared. The struct registry stays shared.
    #[must_use]
    pub fn snapshot(&self) -> LogTable {
        LogTable {
            data: Arc::new(RwLock::new(self.data.read().clone())),
            prefix: self.prefix.clone(),
            depth: self.depth,
            max_depth: self.max_depth,
            timestamp: Arc::new(AtomicI64::new(self.timestamp())),
            registry: Arc::clone(&self.registry),
        }
    }

    /// The key prefix of this view, ending in `/`.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Nesting depth; zero for a root table.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The cycle timestamp in microseconds.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp.load(Ordering::SeqCst)
    }

    /// Sets the cycle timestamp for this table and every view sharing it.
    pub fn set_timestamp(&self, timestamp: i64) {
        self.timestamp.store(timestamp, Ordering::SeqCst);
    }

    pub(crate) fn timestamp_cell(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.timestamp)
    }

    /// The struct registry shared by this table.
    #[must_use]
    pub fn registry(&self) -> &Arc<StructRegistry> {
        &self.registry
    }

    /// Returns the stored values.
    ///
    /// With `subtable_only`, only keys under this prefix are returned, with
    /// the prefix removed. Otherwise the full map is returned.
    #[must_use]
    pub fn get_all(&self, subtable_only: bool) -> BTreeMap<String, Arc<LogValue>> {
        let data = self.data.read();
        if !subtable_only {
            return data.clone();
        }
        data.range(self.prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&self.prefix))
            .map(|(key, value)| (key[self.prefix.len()..].to_string(), Arc::clone(value)))
            .collect()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Returns true if `key` holds a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(&self.full_key(key))
    }

    /// Writes a value, unless the key already holds a different type.
    pub fn put_value(&self, key: &str, value: LogValue) {
        let full_key = self.full_key(key);
        let mut data = self.data.write();
        if let Some(current) = data.get(&full_key) {
            if current.loggable_type() != value.loggable_type() {
                tracing::warn!(
                    key = %full_key,
                    attempted = %value.loggable_type(),
                    expected = %current.loggable_type(),
                    "write rejected: field type changed"
                );
                return;
            }
            if current.custom_type() != value.custom_type() {
                tracing::warn!(
                    key = %full_key,
                    attempted = value.custom_type().unwrap_or("none"),
                    expected = current.custom_type().unwrap_or("none"),
                    "write rejected: field custom type changed"
                );
                return;
            }
        }
        data.insert(full_key, Arc::new(value));
    }

    /// Returns the stored value.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<Arc<LogValue>> {
        self.data.read().get(&self.full_key(key)).cloned()
    }

    /// Writes a scalar, string, byte or array value. Arrays are copied.
    pub fn put<V: Loggable + ?Sized>(&self, key: &str, value: &V) {
        self.put_value(key, LogValue::new(value.to_value()));
    }

    /// Writes a value tagged with a unit.
    pub fn put_with_unit<V: Loggable + ?Sized>(&self, key: &str, value: &V, unit: &str) {
        self.put_value(key, LogValue::new(value.to_value()).with_unit(unit));
    }

    /// Reads a value, or `default` if the key is missing or of another type.
    pub fn get<T: FromValue>(&self, key: &str, default: T) -> T {
        self.get_value(key)
            .and_then(|v| T::from_value(v.value()))
            .unwrap_or(default)
    }

    /// Writes rows under `key/0`, `key/1`, ... with the count at
    /// `key/length`.
    pub fn put_rows<R>(&self, key: &str, rows: &[R], mut put_row: impl FnMut(&LogTable, &str, &R)) {
        let length = i32::try_from(rows.len()).unwrap_or(i32::MAX);
        self.put(&format!("{key}/length"), &length);
        for (i, row) in rows.iter().enumerate() {
            put_row(self, &format!("{key}/{i}"), row);
        }
    }

    /// Reads rows written by [`put_rows`](LogTable::put_rows), or `default`
    /// if `key/length` is missing.
    pub fn get_rows<R>(
        &self,
        key: &str,
        default: Vec<R>,
        mut get_row: impl FnMut(&LogTable, &str) -> R,
    ) -> Vec<R> {
        let length_key = format!("{key}/length");
        if !self.contains(&length_key) {
            return default;
        }
        let length = usize::try_from(self.get(&length_key, 0i32)).unwrap_or(0);
        (0..length)
            .map(|i| get_row(self, &format!("{key}/{i}")))
            .collect()
    }

    /// Writes a two-dimensional array.
    pub fn put_2d<V: Loggable>(&self, key: &str, rows: &[V]) {
        self.put_rows(key, rows, |table, row_key, row| table.put(row_key, row));
    }

    /// Reads a two-dimensional array. Missing rows read as empty.
    pub fn get_2d<T: FromValue + Default>(&self, key: &str, default: Vec<T>) -> Vec<T> {
        self.get_rows(key, default, |table, row_key| table.get(row_key, T::default()))
    }

    /// Writes an enum by variant name.
    pub fn put_enum<E: LogEnum>(&self, key: &str, value: E) {
        self.put(key, value.name());
    }

    /// Reads an enum, or `default` if the stored name is not a variant.
    pub fn get_enum<E: LogEnum>(&self, key: &str, default: E) -> E {
        self.get_value(key)
            .and_then(|v| v.value().as_str().and_then(E::from_name))
            .unwrap_or(default)
    }

    /// Writes an enum array as variant names.
    pub fn put_enum_array<E: LogEnum>(&self, key: &str, values: &[E]) {
        let names: Vec<&str> = values.iter().map(|v| v.name()).collect();
        self.put(key, &names);
    }

    /// Reads an enum array, or `default` if any stored name is unknown.
    pub fn get_enum_array<E: LogEnum>(&self, key: &str, default: Vec<E>) -> Vec<E> {
        self.get_value(key)
            .and_then(|v| {
                v.value()
                    .as_string_array()
                    .and_then(|names| names.iter().map(|n| E::from_name(n)).collect())
            })
            .unwrap_or(default)
    }

    /// Writes a two-dimensional enum array.
    pub fn put_enum_2d<E: LogEnum>(&self, key: &str, rows: &[Vec<E>]) {
        self.put_rows(key, rows, |table, row_key, row| {
            table.put_enum_array(row_key, row);
        });
    }

    /// Reads a two-dimensional enum array.
    pub fn get_enum_2d<E: LogEnum>(&self, key: &str, default: Vec<Vec<E>>) -> Vec<Vec<E>> {
        self.get_rows(key, default, |table, row_key| {
            table.get_enum_array(row_key, Vec::new())
        })
    }

    /// Writes a nested producer into the subtable `key`.
    ///
    /// Refused with a warning once the table is nested deeper than the
    /// configured limit, which catches producers that log themselves.
    pub fn put_inputs<I: LoggableInputs + ?Sized>(&self, key: &str, inputs: &I) {
        if self.depth > self.max_depth {
            tracing::warn!(
                key = %self.full_key(key),
                depth = self.depth,
                "recursive table structure detected, inputs not logged"
            );
            return;
        }
        inputs.to_log(&self.subtable(key));
    }

    /// Reads a nested producer from the subtable `key`.
    pub fn get_inputs<I: LoggableInputs + ?Sized>(&self, key: &str, inputs: &mut I) {
        inputs.from_log(&self.subtable(key));
    }

    fn publish_schemas<T>(&self, codec: &dyn StructCodec<T>) -> CodecResult<()> {
        let entries = collect_schemas(codec, |type_string| {
            self.data.read().contains_key(&schema_key(type_string))
        })?;
        if entries.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write();
        for (type_string, schema) in entries {
            let value = LogValue::new(schema.into_bytes()).with_custom_type(SCHEMA_CUSTOM_TYPE);
            data.insert(schema_key(&type_string), Arc::new(value));
        }
        Ok(())
    }

    /// Writes a struct value, publishing its schemas.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec cannot be built or its schemas are
    /// cyclic. Nothing is written in that case.
    pub fn try_put_struct<T: StructSerializable>(&self, key: &str, value: &T) -> CodecResult<()> {
        let codec = self.registry.codec::<T>()?;
        self.publish_schemas(codec.as_ref())?;
        let bytes = self.registry.pack(codec.as_ref(), value);
        self.put_value(key, LogValue::new(bytes).with_custom_type(codec.type_string()));
        Ok(())
    }

    /// Writes a struct array packed back to back.
    ///
    /// # Errors
    ///
    /// See [`try_put_struct`](LogTable::try_put_struct).
    pub fn try_put_struct_array<T: StructSerializable>(
        &self,
        key: &str,
        values: &[T],
    ) -> CodecResult<()> {
        let codec = self.registry.codec::<T>()?;
        self.publish_schemas(codec.as_ref())?;
        let bytes = self.registry.pack_array(codec.as_ref(), values);
        let custom_type = format!("{}[]", codec.type_string());
        self.put_value(key, LogValue::new(bytes).with_custom_type(custom_type));
        Ok(())
    }

    /// Writes a two-dimensional struct array.
    ///
    /// # Errors
    ///
    /// See [`try_put_struct`](LogTable::try_put_struct). The row count is
    /// written only if the codec is usable.
    pub fn try_put_struct_2d<T: StructSerializable>(
        &self,
        key: &str,
        rows: &[Vec<T>],
    ) -> CodecResult<()> {
        let codec = self.registry.codec::<T>()?;
        self.publish_schemas(codec.as_ref())?;
        let mut result = Ok(());
        self.put_rows(key, rows, |table, row_key, row| {
            if result.is_ok() {
                result = table.try_put_struct_array(row_key, row);
            }
        });
        result
    }

    /// Writes a struct value, logging codec errors.
    pub fn put_struct<T: StructSerializable>(&self, key: &str, value: &T) {
        if let Err(err) = self.try_put_struct(key, value) {
            tracing::error!(key = %self.full_key(key), error = %err, "failed to log struct");
        }
    }

    /// Writes a struct array, logging codec errors.
    pub fn put_struct_array<T: StructSerializable>(&self, key: &str, values: &[T]) {
        if let Err(err) = self.try_put_struct_array(key, values) {
            tracing::error!(key = %self.full_key(key), error = %err, "failed to log struct array");
        }
    }

    /// Writes a two-dimensional struct array, logging codec errors.
    pub fn put_struct_2d<T: StructSerializable>(&self, key: &str, rows: &[Vec<T>]) {
        if let Err(err) = self.try_put_struct_2d(key, rows) {
            tracing::error!(key = %self.full_key(key), error = %err, "failed to log struct array");
        }
    }

    fn struct_bytes(&self, key: &str) -> Option<Arc<LogValue>> {
        self.get_value(key)
            .filter(|v| matches!(v.value(), Value::Raw(_)))
    }

    fn codec_or_log<T: StructSerializable>(&self, key: &str) -> Option<Arc<dyn StructCodec<T>>> {
        match self.registry.codec::<T>() {
            Ok(codec) => Some(codec),
            Err(err) => {
                tracing::error!(key = %self.full_key(key), error = %err, "failed to read struct");
                None
            }
        }
    }

    /// Reads a struct value, or `default` if the key is missing or the value
    /// cannot be unpacked.
    pub fn get_struct<T: StructSerializable>(&self, key: &str, default: T) -> T {
        let Some(stored) = self.struct_bytes(key) else {
            return default;
        };
        let Some(codec) = self.codec_or_log::<T>(key) else {
            return default;
        };
        let mut input = stored.value().as_raw().unwrap_or_default();
        codec.unpack(&mut input).unwrap_or(default)
    }

    /// Reads a struct array, or `default` if the key is missing or any
    /// element cannot be unpacked.
    pub fn get_struct_array<T: StructSerializable>(&self, key: &str, default: Vec<T>) -> Vec<T> {
        let Some(stored) = self.struct_bytes(key) else {
            return default;
        };
        let Some(codec) = self.codec_or_log::<T>(key) else {
            return default;
        };
        let mut input = stored.value().as_raw().unwrap_or_default();
        let size = codec.size();
        if size == 0 {
            return Vec::new();
        }
        let mut values = Vec::with_capacity(input.len() / size);
        while input.len() >= size {
            match codec.unpack(&mut input) {
                Some(value) => values.push(value),
                None => return default,
            }
        }
        values
    }

    /// Reads a two-dimensional struct array.
    pub fn get_struct_2d<T: StructSerializable>(
        &self,
        key: &str,
        default: Vec<Vec<T>>,
    ) -> Vec<Vec<T>> {
        self.get_rows(key, default, |table, row_key| {
            table.get_struct_array(row_key, Vec::new())
        })
    }
}

impl fmt::Debug for LogTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogTable")
            .field("prefix", &self.prefix)
            .field("depth", &self.depth)
            .field("timestamp", &self.timestamp())
            .field("fields", &self.data.read().len())
            .finish()
    }
}

impl fmt::Display for LogTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Timestamp={}", self.timestamp())?;
        writeln!(f, "Prefix=\"{}\"", self.prefix)?;
        writeln!(f, "{{")?;
        for (key, value) in self.get_all(true) {
            write!(f, "\t{key}[{}", value.loggable_type())?;
            if let Some(custom_type) = value.custom_type() {
                write!(f, ",{custom_type}")?;
            }
            if let Some(unit) = value.unit() {
                write!(f, ",{unit}")?;
            }
            writeln!(f, "]={}", value.value())?;
        }
        write!(f, "}}")
    }
}
