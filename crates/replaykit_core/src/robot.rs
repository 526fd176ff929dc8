//! Fixed-period loop runner.

use crate::config::RobotConfig;
use crate::error::CoreResult;
use crate::logger::Logger;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// The user side of a periodic control loop.
pub trait RobotProgram {
    /// Runs once before the first cycle.
    fn robot_init(&mut self, _logger: &mut Logger) {}

    /// Runs once per cycle, between input processing and output recording.
    fn robot_periodic(&mut self, logger: &mut Logger);
}

/// Requests that a running [`LoggedRobot`] loop stop after its current cycle.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Asks the loop to stop.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`stop`](StopHandle::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives a [`RobotProgram`] at a fixed period with a [`Logger`] wrapped
/// around every cycle.
///
/// The next cycle time advances by exactly one period per cycle. If a
/// cycle overruns, the schedule restarts from the current time rather than
/// running several cycles back to back.
#[derive(Debug, Default)]
pub struct LoggedRobot {
    config: RobotConfig,
    stop: StopHandle,
}

fn micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

impl LoggedRobot {
    /// Creates a loop runner.
    #[must_use]
    pub fn new(config: RobotConfig) -> Self {
        Self {
            config,
            stop: StopHandle::default(),
        }
    }

    /// A handle that stops the loop from another thread.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs the loop until replay is exhausted or the stop handle fires.
    ///
    /// Starts the logger if it is not already running. Returns the number
    /// of completed periodic cycles. A panic in the program flushes the
    /// current cycle, ends the logger, then resumes unwinding.
    ///
    /// # Errors
    ///
    /// Returns an error if the logger fails to start or end.
    pub fn run(&self, logger: &mut Logger, program: &mut dyn RobotProgram) -> CoreResult<u64> {
        let init_start = Instant::now();
        if !logger.is_running() {
            logger.start()?;
        }
        if let Err(payload) =
            panic::catch_unwind(AssertUnwindSafe(|| program.robot_init(logger)))
        {
            self.abort(logger, payload);
        }
        logger.periodic_after_user(micros(init_start.elapsed()), 0);
        tracing::info!(period_ms = self.config.period.as_millis(), "robot loop started");

        let origin = Instant::now();
        let mut next_cycle = Duration::ZERO;
        let mut cycles = 0u64;
        while logger.is_running() && !self.stop.is_stopped() {
            if self.config.use_timing {
                let now = origin.elapsed();
                if next_cycle < now {
                    next_cycle = now;
                } else {
                    thread::sleep(next_cycle - now);
                }
                next_cycle += self.config.period;
            }

            let before_start = Instant::now();
            if !logger.periodic_before_user() {
                break;
            }
            let user_start = Instant::now();
            let periodic_before = user_start.duration_since(before_start);

            if let Err(payload) =
                panic::catch_unwind(AssertUnwindSafe(|| program.robot_periodic(logger)))
            {
                self.abort(logger, payload);
            }
            let user_code = user_start.elapsed();

            logger.periodic_after_user(micros(user_code), micros(periodic_before));
            cycles += 1;
        }

        logger.end()?;
        tracing::info!(cycles, "robot loop finished");
        Ok(cycles)
    }

    fn abort(&self, logger: &mut Logger, payload: Box<dyn std::any::Any + Send>) -> ! {
        logger.periodic_after_user(0, 0);
        if let Err(err) = logger.end() {
            tracing::error!(error = %err, "failed to end logger after panic");
        }
        self.stop.stop();
        panic::resume_unwind(payload)
    }
}
