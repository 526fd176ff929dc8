//! Dynamic log value type.

use std::fmt;

/// All value kinds that can be logged.
///
/// The declaration order is the wire ordinal and indexes both type string
/// tables below, so variants must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoggableType {
    /// Raw bytes.
    Raw,
    /// Boolean value.
    Boolean,
    /// Integer (int64) value.
    Integer,
    /// Float (32-bit) value.
    Float,
    /// Double (64-bit) value.
    Double,
    /// UTF-8 string value.
    String,
    /// Boolean array value.
    BooleanArray,
    /// Integer (int64) array value.
    IntegerArray,
    /// Float array value.
    FloatArray,
    /// Double array value.
    DoubleArray,
    /// String array value.
    StringArray,
}

const ALL_TYPES: [LoggableType; 11] = [
    LoggableType::Raw,
    LoggableType::Boolean,
    LoggableType::Integer,
    LoggableType::Float,
    LoggableType::Double,
    LoggableType::String,
    LoggableType::BooleanArray,
    LoggableType::IntegerArray,
    LoggableType::FloatArray,
    LoggableType::DoubleArray,
    LoggableType::StringArray,
];

const WPILOG_TYPES: [&str; 11] = [
    "raw",
    "boolean",
    "int64",
    "float",
    "double",
    "string",
    "boolean[]",
    "int64[]",
    "float[]",
    "double[]",
    "string[]",
];

const NT4_TYPES: [&str; 11] = [
    "raw",
    "boolean",
    "int",
    "float",
    "double",
    "string",
    "boolean[]",
    "int[]",
    "float[]",
    "double[]",
    "string[]",
];

impl LoggableType {
    /// Returns the standard WPILOG type string.
    #[must_use]
    pub const fn wpilog_type(self) -> &'static str {
        WPILOG_TYPES[self as usize]
    }

    /// Returns the standard NT4 type string.
    #[must_use]
    pub const fn nt4_type(self) -> &'static str {
        NT4_TYPES[self as usize]
    }

    /// Parses a WPILOG type string. Unknown strings (including custom
    /// struct types) map to [`LoggableType::Raw`].
    #[must_use]
    pub fn from_wpilog_type(type_str: &str) -> Self {
        WPILOG_TYPES
            .iter()
            .position(|t| *t == type_str)
            .map_or(Self::Raw, |i| ALL_TYPES[i])
    }

    /// Parses an NT4 type string. Unknown strings map to [`LoggableType::Raw`].
    #[must_use]
    pub fn from_nt4_type(type_str: &str) -> Self {
        NT4_TYPES
            .iter()
            .position(|t| *t == type_str)
            .map_or(Self::Raw, |i| ALL_TYPES[i])
    }
}

impl fmt::Display for LoggableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A dynamic log value.
///
/// Equality is structural. Floating point values compare by bit pattern
/// with every NaN treated as the same value, so a field that stays NaN is
/// not seen as changed from one cycle to the next.
#[derive(Debug, Clone)]
pub enum Value {
    /// Raw bytes.
    Raw(Vec<u8>),
    /// Boolean value.
    Boolean(bool),
    /// Integer value.
    Integer(i64),
    /// Float value.
    Float(f32),
    /// Double value.
    Double(f64),
    /// String value.
    String(String),
    /// Boolean array.
    BooleanArray(Vec<bool>),
    /// Integer array.
    IntegerArray(Vec<i64>),
    /// Float array.
    FloatArray(Vec<f32>),
    /// Double array.
    DoubleArray(Vec<f64>),
    /// String array.
    StringArray(Vec<String>),
}

fn f32_bits(v: f32) -> u32 {
    if v.is_nan() {
        f32::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

fn f64_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Raw(a), Value::Raw(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => f32_bits(*a) == f32_bits(*b),
            (Value::Double(a), Value::Double(b)) => f64_bits(*a) == f64_bits(*b),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::BooleanArray(a), Value::BooleanArray(b)) => a == b,
            (Value::IntegerArray(a), Value::IntegerArray(b)) => a == b,
            (Value::FloatArray(a), Value::FloatArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| f32_bits(*x) == f32_bits(*y))
            }
            (Value::DoubleArray(a), Value::DoubleArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| f64_bits(*x) == f64_bits(*y))
            }
            (Value::StringArray(a), Value::StringArray(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    /// Returns the kind of this value.
    #[must_use]
    pub fn loggable_type(&self) -> LoggableType {
        match self {
            Value::Raw(_) => LoggableType::Raw,
            Value::Boolean(_) => LoggableType::Boolean,
            Value::Integer(_) => LoggableType::Integer,
            Value::Float(_) => LoggableType::Float,
            Value::Double(_) => LoggableType::Double,
            Value::String(_) => LoggableType::String,
            Value::BooleanArray(_) => LoggableType::BooleanArray,
            Value::IntegerArray(_) => LoggableType::IntegerArray,
            Value::FloatArray(_) => LoggableType::FloatArray,
            Value::DoubleArray(_) => LoggableType::DoubleArray,
            Value::StringArray(_) => LoggableType::StringArray,
        }
    }

    /// Returns the raw bytes if this is a raw value.
    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            Value::Raw(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the boolean if this is a boolean value.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the float if this is a float value.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the double if this is a double value.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the elements if this is a boolean array.
    pub fn as_boolean_array(&self) -> Option<&[bool]> {
        match self {
            Value::BooleanArray(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the elements if this is an integer array.
    pub fn as_integer_array(&self) -> Option<&[i64]> {
        match self {
            Value::IntegerArray(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the elements if this is a float array.
    pub fn as_float_array(&self) -> Option<&[f32]> {
        match self {
            Value::FloatArray(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the elements if this is a double array.
    pub fn as_double_array(&self) -> Option<&[f64]> {
        match self {
            Value::DoubleArray(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the elements if this is a string array.
    pub fn as_string_array(&self) -> Option<&[String]> {
        match self {
            Value::StringArray(v) => Some(v),
            _ => None,
        }
    }
}

fn write_list<T>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
    mut item: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
) -> fmt::Result {
    f.write_str("[")?;
    for (i, v) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item(f, v)?;
    }
    f.write_str("]")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Raw(b) => write_list(f, b, |f, v| write!(f, "{v}")),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n:?}"),
            Value::Double(n) => write!(f, "{n:?}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::BooleanArray(v) => write_list(f, v, |f, v| write!(f, "{v}")),
            Value::IntegerArray(v) => write_list(f, v, |f, v| write!(f, "{v}")),
            Value::FloatArray(v) => write_list(f, v, |f, v| write!(f, "{v:?}")),
            Value::DoubleArray(v) => write_list(f, v, |f, v| write!(f, "{v:?}")),
            Value::StringArray(v) => write_list(f, v, |f, v| write!(f, "\"{v}\"")),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Float(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Double(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Raw(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Raw(b.to_vec())
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Value::BooleanArray(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::IntegerArray(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::FloatArray(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::DoubleArray(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::StringArray(v)
    }
}

/// A value stored in a log table: the value plus its optional custom type
/// and unit tags.
///
/// The custom type is set only for structured payloads (`struct:Name`,
/// `struct:Name[]`, `structschema`, `proto:...`); when present it replaces
/// the standard type string on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogValue {
    value: Value,
    custom_type: Option<String>,
    unit: Option<String>,
}

impl LogValue {
    /// Creates an untagged log value.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            custom_type: None,
            unit: None,
        }
    }

    /// Sets the custom type string.
    #[must_use]
    pub fn with_custom_type(mut self, custom_type: impl Into<String>) -> Self {
        self.custom_type = Some(custom_type.into());
        self
    }

    /// Sets the unit string.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Returns the wrapped value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the log value and returns the wrapped value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Returns the kind of the wrapped value.
    #[must_use]
    pub fn loggable_type(&self) -> LoggableType {
        self.value.loggable_type()
    }

    /// Returns the custom type string, if any.
    #[must_use]
    pub fn custom_type(&self) -> Option<&str> {
        self.custom_type.as_deref()
    }

    /// Returns the unit string, if any.
    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Returns the WPILOG type string, preferring the custom type.
    #[must_use]
    pub fn wpilog_type(&self) -> &str {
        self.custom_type
            .as_deref()
            .unwrap_or_else(|| self.loggable_type().wpilog_type())
    }

    /// Returns the NT4 type string, preferring the custom type.
    #[must_use]
    pub fn nt4_type(&self) -> &str {
        self.custom_type
            .as_deref()
            .unwrap_or_else(|| self.loggable_type().nt4_type())
    }
}
