//! The capture/replay engine.
//!
//! A [`Logger`] owns the table for the current cycle. In capture mode the
//! control loop's inputs are written into it and the clock supplies the
//! timestamp; in replay mode a [`LogReplaySource`] fills it from an earlier
//! log and the same inputs are read back out. Either way the table is
//! snapshotted at the end of every cycle and handed to the dispatch thread.
//!
//! One cycle looks like this:
//!
//! ```text
//! periodic_before_user()     timestamp / replay cycle loaded
//! process_inputs(...)        inputs logged (capture) or restored (replay)
//! record_output(...)         outputs written under RealOutputs/ReplayOutputs
//! periodic_after_user(..)    timing outputs, snapshot queued
//! ```

use crate::clock::{Clock, MonotonicClock};
use crate::config::LoggerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{CoreError, CoreResult};
use crate::inputs::LoggableInputs;
use crate::receiver::{LogDataReceiver, LogReplaySource};
use crate::table::LogTable;
use replaykit_codec::{LogEnum, LogValue, Loggable, StructRegistry, StructSerializable};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Reads the logger's notion of "now" from any thread.
///
/// While the logger is running with deterministic timestamps, or replaying,
/// this is the current cycle's timestamp. Otherwise it is the clock.
#[derive(Clone)]
pub struct TimeSource {
    cycle: Arc<AtomicI64>,
    use_cycle: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
}

impl TimeSource {
    /// Current time in microseconds.
    #[must_use]
    pub fn now_micros(&self) -> i64 {
        if self.use_cycle.load(Ordering::SeqCst) {
            self.cycle.load(Ordering::SeqCst)
        } else {
            self.clock.now_micros()
        }
    }
}

impl std::fmt::Debug for TimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSource")
            .field("now_micros", &self.now_micros())
            .finish()
    }
}

#[allow(clippy::cast_precision_loss)]
fn micros_to_ms(micros: i64) -> f64 {
    micros as f64 / 1000.0
}

/// The capture/replay engine for one control loop.
pub struct Logger {
    config: LoggerConfig,
    clock: Arc<dyn Clock>,
    entry: LogTable,
    outputs: Option<LogTable>,
    metadata: BTreeMap<String, String>,
    replay_source: Option<Box<dyn LogReplaySource>>,
    receivers: Vec<Box<dyn LogDataReceiver>>,
    dispatcher: Option<Dispatcher>,
    running: bool,
    cycle_count: u64,
    use_cycle_time: Arc<AtomicBool>,
}

impl Logger {
    /// Creates a logger timed by a monotonic clock.
    #[must_use]
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Creates a logger timed by `clock`.
    #[must_use]
    pub fn with_clock(config: LoggerConfig, clock: Arc<dyn Clock>) -> Self {
        let entry = LogTable::with_registry(0, Arc::new(StructRegistry::new()))
            .with_max_depth(config.max_table_depth);
        Self {
            config,
            clock,
            entry,
            outputs: None,
            metadata: BTreeMap::new(),
            replay_source: None,
            receivers: Vec::new(),
            dispatcher: None,
            running: false,
            cycle_count: 0,
            use_cycle_time: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The configuration this logger was created with.
    #[must_use]
    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Adds a receiver for cycle snapshots. Ignored once running.
    pub fn add_data_receiver(&mut self, receiver: impl LogDataReceiver + 'static) {
        if self.running {
            tracing::warn!("data receivers cannot be added after the logger has started");
            return;
        }
        self.receivers.push(Box::new(receiver));
    }

    /// Sets the replay source, switching the logger to replay mode.
    /// Ignored once running.
    pub fn set_replay_source(&mut self, source: impl LogReplaySource + 'static) {
        if self.running {
            tracing::warn!("replay source cannot be set after the logger has started");
            return;
        }
        self.replay_source = Some(Box::new(source));
    }

    /// Records a metadata string, written on the first cycle under
    /// `RealMetadata` or `ReplayMetadata`. Ignored once running.
    pub fn record_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if self.running {
            tracing::warn!("metadata cannot be recorded after the logger has started");
            return;
        }
        self.metadata.insert(key.into(), value.into());
    }

    /// Returns true if a replay source is set.
    #[must_use]
    pub fn has_replay_source(&self) -> bool {
        self.replay_source.is_some()
    }

    /// Returns true between [`start`](Logger::start) and
    /// [`end`](Logger::end).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of cycles begun so far.
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// The table for the current cycle.
    #[must_use]
    pub fn entry(&self) -> &LogTable {
        &self.entry
    }

    /// Starts the replay source and the dispatch thread, then begins the
    /// first cycle.
    ///
    /// If replay has no cycles at all the logger ends again immediately;
    /// check [`is_running`](Logger::is_running).
    ///
    /// # Errors
    ///
    /// Returns an error if the replay source cannot be opened or the
    /// dispatch thread cannot be spawned.
    pub fn start(&mut self) -> CoreResult<()> {
        if self.running {
            return Ok(());
        }

        if let Some(source) = self.replay_source.as_mut() {
            source.start()?;
        }
        let replay = self.has_replay_source();

        self.outputs = Some(
            self.entry
                .subtable(if replay { "ReplayOutputs" } else { "RealOutputs" }),
        );
        let metadata = self
            .entry
            .subtable(if replay { "ReplayMetadata" } else { "RealMetadata" });
        for (key, value) in &self.metadata {
            metadata.put(key, value.as_str());
        }

        let receivers = std::mem::take(&mut self.receivers);
        self.dispatcher = Some(Dispatcher::start(self.config.queue_capacity, receivers)?);
        self.running = true;
        self.use_cycle_time
            .store(self.config.deterministic_timestamps || replay, Ordering::SeqCst);
        tracing::info!(
            mode = if replay { "replay" } else { "capture" },
            "logger started"
        );

        self.periodic_before_user();
        Ok(())
    }

    /// Ends the run: closes the replay source, drains the queue into the
    /// receivers and stops the dispatch thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatch thread panicked.
    pub fn end(&mut self) -> CoreResult<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        self.use_cycle_time.store(false, Ordering::SeqCst);
        if let Some(source) = self.replay_source.as_mut() {
            source.end();
        }
        let result = match self.dispatcher.take() {
            Some(dispatcher) => dispatcher.shutdown(),
            None => Ok(()),
        };
        tracing::info!(cycles = self.cycle_count, "logger ended");
        result
    }

    /// Begins a cycle.
    ///
    /// In capture mode the table timestamp is taken from the clock; in
    /// replay mode the next cycle is loaded. Returns false if the logger is
    /// not running, including when replay has just run out of cycles.
    pub fn periodic_before_user(&mut self) -> bool {
        self.cycle_count += 1;
        if !self.running {
            return false;
        }

        let update_start = self.clock.now_micros();
        let exhausted = match self.replay_source.as_mut() {
            None => {
                self.entry.set_timestamp(update_start);
                false
            }
            Some(source) => !source.update_table(&self.entry),
        };
        if exhausted {
            tracing::info!(cycles = self.cycle_count - 1, "replay source exhausted");
            if let Err(err) = self.end() {
                tracing::error!(error = %err, "failed to end logger");
            }
            return false;
        }
        let update_end = self.clock.now_micros();

        self.record_output("Logger/EntryUpdateMS", &micros_to_ms(update_end - update_start));
        true
    }

    /// Ends a cycle: records timing outputs and queues a snapshot of the
    /// table for the receivers.
    ///
    /// `user_code_micros` is the time spent in the control loop body and
    /// `periodic_before_micros` the time spent in
    /// [`periodic_before_user`](Logger::periodic_before_user).
    pub fn periodic_after_user(&mut self, user_code_micros: i64, periodic_before_micros: i64) {
        if !self.running {
            return;
        }

        let after_start = self.clock.now_micros();
        let queued = self.dispatcher.as_ref().map_or(0, Dispatcher::queued);
        let periodic_after_micros = self.clock.now_micros() - after_start;

        self.record_output("LoggedRobot/UserCodeMS", &micros_to_ms(user_code_micros));
        self.record_output(
            "LoggedRobot/LogPeriodicMS",
            &micros_to_ms(periodic_before_micros + periodic_after_micros),
        );
        self.record_output(
            "LoggedRobot/FullCycleMS",
            &micros_to_ms(periodic_before_micros + user_code_micros + periodic_after_micros),
        );
        self.record_output(
            "Logger/QueuedCycles",
            &i32::try_from(queued).unwrap_or(i32::MAX),
        );

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.offer(self.entry.snapshot());
        }
    }

    /// Logs `inputs` under `key` (capture) or restores them from the table
    /// (replay).
    ///
    /// A panic inside the producer is caught and logged so that one broken
    /// producer does not take down the control loop.
    pub fn process_inputs<I: LoggableInputs + ?Sized>(&self, key: &str, inputs: &mut I) {
        if !self.running {
            return;
        }
        let table = self.entry.subtable(key);
        let replay = self.has_replay_source();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            if replay {
                inputs.from_log(&table);
            } else {
                inputs.to_log(&table);
            }
        }));
        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(key, panic = %message, "inputs panicked while being processed");
        }
    }

    /// True if the last snapshot was dropped because the queue was full.
    #[must_use]
    pub fn receiver_queue_fault(&self) -> bool {
        self.dispatcher.as_ref().is_some_and(Dispatcher::fault)
    }

    /// The current timestamp in microseconds. See [`TimeSource`].
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.time_source().now_micros()
    }

    /// A handle for reading the logger's timestamp from other threads.
    #[must_use]
    pub fn time_source(&self) -> TimeSource {
        TimeSource {
            cycle: self.entry.timestamp_cell(),
            use_cycle: Arc::clone(&self.use_cycle_time),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Runs `f` on every `n`th cycle. Never runs it when `n` is zero.
    pub fn run_every_n(&self, n: u64, f: impl FnOnce()) {
        if n != 0 && self.cycle_count % n == 0 {
            f();
        }
    }

    fn outputs(&self) -> Option<&LogTable> {
        if self.running {
            self.outputs.as_ref()
        } else {
            None
        }
    }

    /// Records an output value.
    pub fn record_output<V: Loggable + ?Sized>(&self, key: &str, value: &V) {
        if let Some(outputs) = self.outputs() {
            outputs.put(key, value);
        }
    }

    /// Records an output value only computing it while running.
    pub fn record_output_with<V: Loggable>(&self, key: &str, value: impl FnOnce() -> V) {
        if let Some(outputs) = self.outputs() {
            outputs.put(key, &value());
        }
    }

    /// Records an output value with a unit.
    pub fn record_output_with_unit<V: Loggable + ?Sized>(&self, key: &str, value: &V, unit: &str) {
        if let Some(outputs) = self.outputs() {
            outputs.put_with_unit(key, value, unit);
        }
    }

    /// Records a prebuilt log value.
    pub fn record_output_value(&self, key: &str, value: LogValue) {
        if let Some(outputs) = self.outputs() {
            outputs.put_value(key, value);
        }
    }

    /// Records a two-dimensional output array.
    pub fn record_output_2d<V: Loggable>(&self, key: &str, rows: &[V]) {
        if let Some(outputs) = self.outputs() {
            outputs.put_2d(key, rows);
        }
    }

    /// Records an enum output by variant name.
    pub fn record_output_enum<E: LogEnum>(&self, key: &str, value: E) {
        if let Some(outputs) = self.outputs() {
            outputs.put_enum(key, value);
        }
    }

    /// Records an enum array output.
    pub fn record_output_enum_array<E: LogEnum>(&self, key: &str, values: &[E]) {
        if let Some(outputs) = self.outputs() {
            outputs.put_enum_array(key, values);
        }
    }

    /// Records a two-dimensional enum array output.
    pub fn record_output_enum_2d<E: LogEnum>(&self, key: &str, rows: &[Vec<E>]) {
        if let Some(outputs) = self.outputs() {
            outputs.put_enum_2d(key, rows);
        }
    }

    /// Records a struct output. Codec errors are logged.
    pub fn record_output_struct<T: StructSerializable>(&self, key: &str, value: &T) {
        if let Some(outputs) = self.outputs() {
            outputs.put_struct(key, value);
        }
    }

    /// Records a struct array output. Codec errors are logged.
    pub fn record_output_struct_array<T: StructSerializable>(&self, key: &str, values: &[T]) {
        if let Some(outputs) = self.outputs() {
            outputs.put_struct_array(key, values);
        }
    }

    /// Records a two-dimensional struct array output. Codec errors are logged.
    pub fn record_output_struct_2d<T: StructSerializable>(&self, key: &str, rows: &[Vec<T>]) {
        if let Some(outputs) = self.outputs() {
            outputs.put_struct_2d(key, rows);
        }
    }

    /// Records a struct output, returning codec errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the struct codec cannot be built or its schemas
    /// are cyclic.
    pub fn try_record_output_struct<T: StructSerializable>(
        &self,
        key: &str,
        value: &T,
    ) -> CoreResult<()> {
        match self.outputs() {
            Some(outputs) => Ok(outputs.try_put_struct(key, value)?),
            None => Err(CoreError::invalid_operation("logger is not running")),
        }
    }

    /// Records a nested producer as outputs.
    pub fn record_output_inputs<I: LoggableInputs + ?Sized>(&self, key: &str, inputs: &I) {
        if let Some(outputs) = self.outputs() {
            outputs.put_inputs(key, inputs);
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if let Err(err) = self.end() {
            tracing::error!(error = %err, "failed to end logger");
        }
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("running", &self.running)
            .field("replay", &self.has_replay_source())
            .field("cycle_count", &self.cycle_count)
            .finish_non_exhaustive()
    }
}
