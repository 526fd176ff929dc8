//! The producer contract.

use crate::table::LogTable;

/// A group of inputs read by the control loop each cycle.
///
/// `to_log` and `from_log` must mirror each other: whatever is written in
/// capture mode must be read back in replay so that the control loop sees
/// the same values. Reads should fall back to the current field value so
/// that keys missing from an older log leave the field untouched.
///
/// ```rust
/// use replaykit_core::{LogTable, LoggableInputs};
///
/// #[derive(Default)]
/// struct GyroInputs {
///     connected: bool,
///     yaw_radians: f64,
/// }
///
/// impl LoggableInputs for GyroInputs {
///     fn to_log(&self, table: &LogTable) {
///         table.put("Connected", &self.connected);
///         table.put_with_unit("Yaw", &self.yaw_radians, "radians");
///     }
///
///     fn from_log(&mut self, table: &LogTable) {
///         self.connected = table.get("Connected", self.connected);
///         self.yaw_radians = table.get("Yaw", self.yaw_radians);
///     }
/// }
/// ```
pub trait LoggableInputs {
    /// Writes the current values into `table`.
    fn to_log(&self, table: &LogTable);

    /// Replaces the current values with those in `table`.
    fn from_log(&mut self, table: &LogTable);
}
