//! # ReplayKit Testkit
//!
//! Test utilities for ReplayKit.
//!
//! This crate provides:
//! - Fixtures: temporary log folders, recording sinks, scripted replay
//! - Property-based generators for values and cycles
//! - Golden file helpers and byte vectors for the WPILOG format
//! - Capture-then-replay integration helpers
//! - Fuzz targets for log parsing
//! - Interrupted-write and queue stress harnesses
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replaykit_testkit::prelude::*;
//!
//! #[test]
//! fn inputs_survive_replay() {
//!     let states = vec![MyInputs::default(); 3];
//!     assert_eq!(capture_then_replay(&states), states);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod golden;
pub mod integration;
pub mod stress;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::golden::*;
    pub use crate::integration::*;
}

pub use crash::{CrashRecoveryHarness, CrashRecoveryResult, CrashableBackend};
pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use golden::*;
pub use integration::*;
pub use stress::*;
pub use vectors::*;
