//! # ReplayKit Codec
//!
//! The value model and struct codecs shared by every ReplayKit crate.
//!
//! - [`Value`] and [`LogValue`]: the tagged union stored in log tables,
//!   with optional custom type and unit tags.
//! - [`LoggableType`]: value kinds and their WPILOG / NT4 type strings.
//! - [`Loggable`] / [`FromValue`]: conversions from and to Rust types.
//! - [`LogEnum`]: enums stored by variant name.
//! - [`StructCodec`], [`Record`] and [`StructRegistry`]: fixed-size binary
//!   structs with published schemas.
//!
//! ## Usage
//!
//! ```
//! use replaykit_codec::{Loggable, LogValue, Value};
//!
//! let value = [1.0f64, 2.0].to_value();
//! assert_eq!(value, Value::DoubleArray(vec![1.0, 2.0]));
//!
//! let tagged = LogValue::new(value).with_unit("meters");
//! assert_eq!(tagged.wpilog_type(), "double[]");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod convert;
mod enums;
mod error;
pub mod structs;
mod value;

pub use convert::{FromValue, Loggable};
pub use enums::LogEnum;
pub use error::{CodecError, CodecResult};
pub use structs::{
    collect_schemas, schema_key, schema_of, FieldList, FieldValue, FieldValues, Record,
    RecordStruct, StructCodec, StructRegistry, StructSchema, StructSerializable,
    SCHEMA_CUSTOM_TYPE,
};
pub use value::{LogValue, LoggableType, Value};
