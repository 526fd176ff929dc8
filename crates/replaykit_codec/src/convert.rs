//! Conversions between Rust types and [`Value`].
//!
//! [`Loggable`] turns a borrowed Rust value into an owned [`Value`], copying
//! arrays so that later mutation by the caller never reaches the log.
//! [`FromValue`] is the inverse, returning `None` on a kind mismatch.

use crate::value::Value;

/// A Rust value that can be stored in a log table.
pub trait Loggable {
    /// Converts to an owned value.
    fn to_value(&self) -> Value;
}

/// A Rust value that can be read back from a log table.
pub trait FromValue: Sized {
    /// Converts from a stored value, or `None` if the kind does not match.
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! loggable_scalar {
    ($ty:ty, $variant:ident, $conv:expr) => {
        impl Loggable for $ty {
            fn to_value(&self) -> Value {
                #[allow(clippy::redundant_closure_call)]
                Value::$variant(($conv)(*self))
            }
        }
    };
}

loggable_scalar!(bool, Boolean, |v| v);
loggable_scalar!(i64, Integer, |v| v);
loggable_scalar!(i32, Integer, i64::from);
loggable_scalar!(f32, Float, |v| v);
loggable_scalar!(f64, Double, |v| v);

impl Loggable for str {
    fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl Loggable for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl Loggable for [u8] {
    fn to_value(&self) -> Value {
        Value::Raw(self.to_vec())
    }
}

impl Loggable for [bool] {
    fn to_value(&self) -> Value {
        Value::BooleanArray(self.to_vec())
    }
}

impl Loggable for [i64] {
    fn to_value(&self) -> Value {
        Value::IntegerArray(self.to_vec())
    }
}

impl Loggable for [i32] {
    fn to_value(&self) -> Value {
        Value::IntegerArray(self.iter().map(|v| i64::from(*v)).collect())
    }
}

impl Loggable for [f32] {
    fn to_value(&self) -> Value {
        Value::FloatArray(self.to_vec())
    }
}

impl Loggable for [f64] {
    fn to_value(&self) -> Value {
        Value::DoubleArray(self.to_vec())
    }
}

impl Loggable for [String] {
    fn to_value(&self) -> Value {
        Value::StringArray(self.to_vec())
    }
}

impl Loggable for [&str] {
    fn to_value(&self) -> Value {
        Value::StringArray(self.iter().map(|s| (*s).to_string()).collect())
    }
}

impl<T> Loggable for Vec<T>
where
    [T]: Loggable,
{
    fn to_value(&self) -> Value {
        self.as_slice().to_value()
    }
}

impl<T, const N: usize> Loggable for [T; N]
where
    [T]: Loggable,
{
    fn to_value(&self) -> Value {
        self.as_slice().to_value()
    }
}

impl<T: Loggable + ?Sized> Loggable for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl Loggable for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_boolean()
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_integer()
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_integer().and_then(|v| i32::try_from(v).ok())
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_float()
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_double()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_raw().map(<[u8]>::to_vec)
    }
}

impl FromValue for Vec<bool> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_boolean_array().map(<[bool]>::to_vec)
    }
}

impl FromValue for Vec<i64> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_integer_array().map(<[i64]>::to_vec)
    }
}

impl FromValue for Vec<i32> {
    /// `None` if any element is out of `i32` range.
    fn from_value(value: &Value) -> Option<Self> {
        value
            .as_integer_array()?
            .iter()
            .map(|n| i32::try_from(*n).ok())
            .collect()
    }
}

impl FromValue for Vec<f32> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_float_array().map(<[f32]>::to_vec)
    }
}

impl FromValue for Vec<f64> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_double_array().map(<[f64]>::to_vec)
    }
}

impl FromValue for Vec<String> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_string_array().map(<[String]>::to_vec)
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_widens() {
        assert_eq!(7i32.to_value(), Value::Integer(7));
        assert_eq!(vec![1i32, -2].to_value(), Value::IntegerArray(vec![1, -2]));
        assert_eq!(i32::from_value(&Value::Integer(-3)), Some(-3));
    }

    #[test]
    fn int32_out_of_range_is_none() {
        assert_eq!(i32::from_value(&Value::Integer(i64::from(i32::MAX) + 1)), None);
        assert_eq!(i32::from_value(&Value::Integer(i64::from(i32::MIN))), Some(i32::MIN));
        assert_eq!(
            Vec::<i32>::from_value(&Value::IntegerArray(vec![1, i64::MIN])),
            None
        );
    }

    #[test]
    fn bytes_are_raw() {
        assert_eq!(vec![1u8, 2].to_value(), Value::Raw(vec![1, 2]));
        assert_eq!(Vec::<u8>::from_value(&Value::Raw(vec![9])), Some(vec![9]));
    }

    #[test]
    fn str_slices_become_string_arrays() {
        let v = ["a", "b"].to_value();
        assert_eq!(v, Value::StringArray(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn mismatched_kind_is_none() {
        assert_eq!(bool::from_value(&Value::Integer(1)), None);
        assert_eq!(f32::from_value(&Value::Double(1.0)), None);
        assert_eq!(Vec::<f64>::from_value(&Value::FloatArray(vec![])), None);
    }

    #[test]
    fn arrays_are_copied() {
        let mut source = vec![1.0f64, 2.0];
        let stored = source.to_value();
        source[0] = 99.0;
        assert_eq!(stored, Value::DoubleArray(vec![1.0, 2.0]));
    }
}
