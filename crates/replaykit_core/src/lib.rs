//! # ReplayKit Core
//!
//! Deterministic capture and replay for periodic control loops.
//!
//! This crate provides:
//! - [`LogTable`], the per-cycle key/value snapshot with typed access
//! - [`Logger`], which runs each cycle in capture or replay mode
//! - A bounded dispatch queue feeding [`LogDataReceiver`] sinks on a
//!   background thread
//! - WPILOG writing and replay in [`wpilog`]
//! - A live RLOG stream for dashboards in [`rlog`]
//! - [`LoggedRobot`], a fixed-period loop runner
//!
//! ## Example
//!
//! ```rust
//! use replaykit_core::{LogTable, Logger, LoggerConfig, LoggableInputs};
//!
//! #[derive(Default)]
//! struct ArmInputs {
//!     angle: f64,
//! }
//!
//! impl LoggableInputs for ArmInputs {
//!     fn to_log(&self, table: &LogTable) {
//!         table.put("Angle", &self.angle);
//!     }
//!
//!     fn from_log(&mut self, table: &LogTable) {
//!         self.angle = table.get("Angle", self.angle);
//!     }
//! }
//!
//! let mut logger = Logger::new(LoggerConfig::default());
//! logger.start().unwrap();
//!
//! let mut inputs = ArmInputs { angle: 0.5 };
//! logger.process_inputs("Arm", &mut inputs);
//! logger.record_output("Arm/Setpoint", &1.0f64);
//! logger.periodic_after_user(0, 0);
//!
//! logger.end().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod dispatch;
mod error;
mod inputs;
mod log_path;
mod logger;
mod receiver;
pub mod rlog;
mod robot;
mod table;
pub mod wpilog;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{LoggerConfig, RobotConfig, DEFAULT_MAX_TABLE_DEPTH, DEFAULT_QUEUE_CAPACITY};
pub use dispatch::{Dispatcher, DISPATCH_THREAD_NAME};
pub use error::{CoreError, CoreResult};
pub use inputs::LoggableInputs;
pub use log_path::{add_path_suffix, find_replay_log, REPLAY_LOG_ENV};
pub use logger::{Logger, TimeSource};
pub use receiver::{LogDataReceiver, LogReplaySource, TIMESTAMP_KEY};
pub use rlog::{RlogServer, RlogServerConfig};
pub use robot::{LoggedRobot, RobotProgram, StopHandle};
pub use table::LogTable;
pub use wpilog::{WpilogReader, WpilogWriter, WpilogWriterConfig};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use replaykit_codec::{
    log_enum, record_struct, FieldList, FieldValues, FromValue, LogEnum, LogValue, Loggable,
    LoggableType, Record, StructCodec, StructSchema, StructSerializable, Value,
};
