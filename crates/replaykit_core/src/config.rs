//! Logger and loop configuration.

use std::time::Duration;

/// Default capacity of the snapshot queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// Default maximum nesting depth for `put_inputs`.
pub const DEFAULT_MAX_TABLE_DEPTH: usize = 100;

/// Configuration for a [`Logger`](crate::Logger).
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Capacity of the queue between the control loop and the sinks.
    pub queue_capacity: usize,

    /// Whether `timestamp()` returns the cycle timestamp while running.
    ///
    /// When false and no replay source is set, it reads the clock instead.
    pub deterministic_timestamps: bool,

    /// Subtable depth beyond which `put_inputs` is refused.
    pub max_table_depth: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            deterministic_timestamps: true,
            max_table_depth: DEFAULT_MAX_TABLE_DEPTH,
        }
    }
}

impl LoggerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the snapshot queue capacity.
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets whether timestamps are deterministic.
    #[must_use]
    pub const fn deterministic_timestamps(mut self, value: bool) -> Self {
        self.deterministic_timestamps = value;
        self
    }

    /// Sets the maximum `put_inputs` depth.
    #[must_use]
    pub const fn max_table_depth(mut self, depth: usize) -> Self {
        self.max_table_depth = depth;
        self
    }
}

/// Configuration for a [`LoggedRobot`](crate::LoggedRobot) loop.
#[derive(Debug, Clone)]
pub struct RobotConfig {
    /// Loop period.
    pub period: Duration,

    /// Whether to sleep until the next period. Replay runs usually turn
    /// this off to go as fast as possible.
    pub use_timing: bool,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(20),
            use_timing: true,
        }
    }
}

impl RobotConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the loop period.
    #[must_use]
    pub const fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Sets whether the loop sleeps between cycles.
    #[must_use]
    pub const fn use_timing(mut self, value: bool) -> Self {
        self.use_timing = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LoggerConfig::default();
        assert_eq!(config.queue_capacity, 500);
        assert!(config.deterministic_timestamps);
        assert_eq!(config.max_table_depth, 100);

        let robot = RobotConfig::default();
        assert_eq!(robot.period, Duration::from_millis(20));
        assert!(robot.use_timing);
    }

    #[test]
    fn builder_pattern() {
        let config = LoggerConfig::new()
            .queue_capacity(8)
            .deterministic_timestamps(false)
            .max_table_depth(3);

        assert_eq!(config.queue_capacity, 8);
        assert!(!config.deterministic_timestamps);
        assert_eq!(config.max_table_depth, 3);

        let robot = RobotConfig::new()
            .period(Duration::from_millis(10))
            .use_timing(false);
        assert_eq!(robot.period, Duration::from_millis(10));
        assert!(!robot.use_timing);
    }
}
