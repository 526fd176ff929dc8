//! Stress helpers for the snapshot queue.
//!
//! These push cycles faster than the sinks can take them and check that the
//! control loop side never blocks and never reorders.

use parking_lot::{Condvar, Mutex};
use replaykit_core::{CoreResult, Dispatcher, LogDataReceiver, LogTable};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Snapshots offered.
    pub offered: usize,
    /// Snapshots the queue accepted.
    pub accepted: usize,
    /// Snapshots dropped because the queue was full.
    pub dropped: usize,
    /// Snapshots the sink received.
    pub received: usize,
    /// Slowest single offer.
    pub max_offer_latency: Duration,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Offers per second.
    #[allow(clippy::cast_precision_loss)]
    pub fn offers_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.offered as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Offered: {}", self.offered);
        println!("Accepted: {}", self.accepted);
        println!("Dropped: {}", self.dropped);
        println!("Received: {}", self.received);
        println!("Max offer latency: {:?}", self.max_offer_latency);
        println!("Throughput: {:.2} offers/sec", self.offers_per_second());
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of cycles to offer.
    pub cycles: usize,
    /// Queue capacity.
    pub capacity: usize,
    /// Fields per snapshot.
    pub fields: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            cycles: 10_000,
            capacity: 64,
            fields: 32,
        }
    }
}

#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }

    fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

/// A sink that blocks until its gate opens and records timestamps.
struct GatedReceiver {
    gate: Arc<Gate>,
    timestamps: Arc<Mutex<Vec<i64>>>,
    received: Arc<AtomicUsize>,
}

impl LogDataReceiver for GatedReceiver {
    fn put_table(&mut self, table: &LogTable) -> CoreResult<()> {
        self.gate.wait();
        self.timestamps.lock().push(table.timestamp());
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn snapshot(cycle: usize, fields: usize) -> LogTable {
    let timestamp = i64::try_from(cycle).unwrap_or(i64::MAX);
    let table = LogTable::new(timestamp);
    for field in 0..fields {
        table.put(&format!("Stress/Field{field}"), &timestamp);
    }
    table
}

/// Offers `config.cycles` snapshots while the sink is blocked, then lets
/// it drain.
///
/// Returns the result and the timestamps the sink saw, in order.
pub fn stress_blocked_sink(config: &StressConfig) -> (StressTestResult, Vec<i64>) {
    let gate = Arc::new(Gate::default());
    let timestamps = Arc::new(Mutex::new(Vec::new()));
    let received = Arc::new(AtomicUsize::new(0));
    let receiver = GatedReceiver {
        gate: Arc::clone(&gate),
        timestamps: Arc::clone(&timestamps),
        received: Arc::clone(&received),
    };
    let dispatcher =
        Dispatcher::start(config.capacity, vec![Box::new(receiver)]).expect("Failed to start dispatcher");

    let start = Instant::now();
    let mut accepted = 0;
    let mut max_offer_latency = Duration::ZERO;
    for cycle in 0..config.cycles {
        let table = snapshot(cycle, config.fields);
        let offer_start = Instant::now();
        if dispatcher.offer(table) {
            accepted += 1;
        }
        max_offer_latency = max_offer_latency.max(offer_start.elapsed());
    }
    let duration = start.elapsed();

    gate.open();
    dispatcher.shutdown().expect("Dispatcher failed");

    let result = StressTestResult {
        offered: config.cycles,
        accepted,
        dropped: config.cycles - accepted,
        received: received.load(Ordering::SeqCst),
        max_offer_latency,
        duration,
    };
    let seen = timestamps.lock().clone();
    (result, seen)
}

/// Offers snapshots to a free-running sink and checks nothing is lost.
pub fn stress_free_sink(config: &StressConfig) -> StressTestResult {
    let gate = Arc::new(Gate::default());
    gate.open();
    let received = Arc::new(AtomicUsize::new(0));
    let receiver = GatedReceiver {
        gate,
        timestamps: Arc::new(Mutex::new(Vec::new())),
        received: Arc::clone(&received),
    };
    let dispatcher =
        Dispatcher::start(config.capacity, vec![Box::new(receiver)]).expect("Failed to start dispatcher");

    let start = Instant::now();
    let mut accepted = 0;
    let mut max_offer_latency = Duration::ZERO;
    for cycle in 0..config.cycles {
        let table = snapshot(cycle, config.fields);
        let offer_start = Instant::now();
        // Retry until there is room, as a slower control loop would.
        while !dispatcher.offer(table.snapshot()) {
            std::thread::yield_now();
        }
        accepted += 1;
        max_offer_latency = max_offer_latency.max(offer_start.elapsed());
    }
    dispatcher.shutdown().expect("Dispatcher failed");

    StressTestResult {
        offered: config.cycles,
        accepted,
        dropped: 0,
        received: received.load(Ordering::SeqCst),
        max_offer_latency,
        duration: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_sink_drops_overflow_in_order() {
        let config = StressConfig {
            cycles: 500,
            capacity: 16,
            fields: 4,
        };
        let (result, seen) = stress_blocked_sink(&config);
        result.print_summary("Blocked sink");

        // One snapshot may already be held by the blocked sink.
        assert!(result.accepted >= config.capacity);
        assert!(result.accepted <= config.capacity + 1);
        assert_eq!(result.dropped, config.cycles - result.accepted);
        assert_eq!(result.received, result.accepted);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.first(), Some(&0));
    }

    #[test]
    fn free_sink_receives_everything() {
        let config = StressConfig {
            cycles: 2_000,
            capacity: 8,
            fields: 8,
        };
        let result = stress_free_sink(&config);
        result.print_summary("Free sink");
        assert_eq!(result.received, config.cycles);
        assert_eq!(result.dropped, 0);
    }
}
