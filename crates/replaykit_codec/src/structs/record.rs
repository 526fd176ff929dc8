//! Struct codecs derived from declarative field lists.

use super::{StructCodec, StructSchema, StructSerializable};
use crate::enums::LogEnum;
use crate::error::{CodecError, CodecResult};
use bytes::{Buf, BufMut, BytesMut};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::sync::Arc;

/// A record type whose struct codec is derived from its field list.
///
/// ```rust
/// use replaykit_codec::{record_struct, FieldList, Record};
///
/// struct Translation {
///     x: f64,
///     y: f64,
/// }
///
/// impl Record for Translation {
///     const TYPE_NAME: &'static str = "Translation";
///
///     fn fields(fields: FieldList<Self>) -> FieldList<Self> {
///         fields
///             .float64("x", |t| t.x)
///             .float64("y", |t| t.y)
///             .constructor(|v| Some(Translation { x: v.float64()?, y: v.float64()? }))
///     }
/// }
/// record_struct!(Translation);
/// ```
pub trait Record: Sized + Send + 'static {
    /// The struct type name.
    const TYPE_NAME: &'static str;

    /// Declares the fields in packing order.
    fn fields(fields: FieldList<Self>) -> FieldList<Self>;
}

/// A field value decoded during unpacking.
#[derive(Debug)]
pub enum FieldValue {
    /// `bool` field.
    Boolean(bool),
    /// `int16` field.
    Int16(i16),
    /// `int32` field, also used for enum ordinals.
    Int32(i32),
    /// `int64` field.
    Int64(i64),
    /// `float` field.
    Float32(f32),
    /// `double` field.
    Float64(f64),
    /// Nested struct field.
    Nested(Box<dyn Any + Send>),
    /// A field that has no packed representation or could not be read.
    Missing,
}

/// Decoded field values handed to a record constructor, in declared order.
///
/// Each taker consumes one field and returns `None` if that field has a
/// different kind.
#[derive(Debug)]
pub struct FieldValues {
    values: std::vec::IntoIter<FieldValue>,
}

impl FieldValues {
    fn new(values: Vec<FieldValue>) -> Self {
        Self {
            values: values.into_iter(),
        }
    }

    /// Takes a `bool` field.
    pub fn boolean(&mut self) -> Option<bool> {
        match self.values.next()? {
            FieldValue::Boolean(v) => Some(v),
            _ => None,
        }
    }

    /// Takes an `int16` field.
    pub fn int16(&mut self) -> Option<i16> {
        match self.values.next()? {
            FieldValue::Int16(v) => Some(v),
            _ => None,
        }
    }

    /// Takes an `int32` field.
    pub fn int32(&mut self) -> Option<i32> {
        match self.values.next()? {
            FieldValue::Int32(v) => Some(v),
            _ => None,
        }
    }

    /// Takes an `int64` field.
    pub fn int64(&mut self) -> Option<i64> {
        match self.values.next()? {
            FieldValue::Int64(v) => Some(v),
            _ => None,
        }
    }

    /// Takes a `float` field.
    pub fn float32(&mut self) -> Option<f32> {
        match self.values.next()? {
            FieldValue::Float32(v) => Some(v),
            _ => None,
        }
    }

    /// Takes a `double` field.
    pub fn float64(&mut self) -> Option<f64> {
        match self.values.next()? {
            FieldValue::Float64(v) => Some(v),
            _ => None,
        }
    }

    /// Takes an enum field stored by ordinal.
    pub fn enumeration<E: LogEnum>(&mut self) -> Option<E> {
        match self.values.next()? {
            FieldValue::Int32(ordinal) => usize::try_from(ordinal).ok().and_then(E::from_ordinal),
            _ => None,
        }
    }

    /// Takes a nested struct field.
    pub fn nested<N: 'static>(&mut self) -> Option<N> {
        match self.values.next()? {
            FieldValue::Nested(value) => value.downcast::<N>().ok().map(|v| *v),
            _ => None,
        }
    }

    /// Skips one field, such as an unsupported one.
    pub fn skip(&mut self) {
        self.values.next();
    }
}

type Writer<T> = Box<dyn Fn(&T, &mut BytesMut) + Send + Sync>;
type Reader = Box<dyn Fn(&mut &[u8]) -> FieldValue + Send + Sync>;
type Constructor<T> = Box<dyn Fn(&mut FieldValues) -> Option<T> + Send + Sync>;

struct Slot<T> {
    size: usize,
    write: Writer<T>,
    read: Reader,
}

/// Builder for a record's ordered field list.
pub struct FieldList<T> {
    type_name: &'static str,
    names: Vec<String>,
    slots: Vec<Slot<T>>,
    schema: String,
    size: usize,
    nested: Vec<Arc<dyn StructSchema>>,
    constructor: Option<Constructor<T>>,
    error: Option<CodecError>,
}

impl<T: 'static> FieldList<T> {
    fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            names: Vec::new(),
            slots: Vec::new(),
            schema: String::new(),
            size: 0,
            nested: Vec::new(),
            constructor: None,
            error: None,
        }
    }

    fn fail(&mut self, err: CodecError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn push(mut self, name: &str, declaration: &str, size: usize, write: Writer<T>, read: Reader) -> Self {
        if self.names.iter().any(|n| n == name) {
            let err = CodecError::derivation(self.type_name, format!("duplicate field '{name}'"));
            self.fail(err);
            return self;
        }
        self.names.push(name.to_string());
        self.schema.push_str(&format!("{declaration} {name};"));
        self.size += size;
        self.slots.push(Slot { size, write, read });
        self
    }

    /// Adds a `bool` field.
    #[must_use]
    pub fn boolean(self, name: &str, get: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.push(
            name,
            "bool",
            1,
            Box::new(move |v, out| out.put_u8(u8::from(get(v)))),
            Box::new(|input| FieldValue::Boolean(input.get_u8() != 0)),
        )
    }

    /// Adds an `int16` field.
    #[must_use]
    pub fn int16(self, name: &str, get: impl Fn(&T) -> i16 + Send + Sync + 'static) -> Self {
        self.push(
            name,
            "int16",
            2,
            Box::new(move |v, out| out.put_i16_le(get(v))),
            Box::new(|input| FieldValue::Int16(input.get_i16_le())),
        )
    }

    /// Adds an `int32` field.
    #[must_use]
    pub fn int32(self, name: &str, get: impl Fn(&T) -> i32 + Send + Sync + 'static) -> Self {
        self.push(
            name,
            "int32",
            4,
            Box::new(move |v, out| out.put_i32_le(get(v))),
            Box::new(|input| FieldValue::Int32(input.get_i32_le())),
        )
    }

    /// Adds an `int64` field.
    #[must_use]
    pub fn int64(self, name: &str, get: impl Fn(&T) -> i64 + Send + Sync + 'static) -> Self {
        self.push(
            name,
            "int64",
            8,
            Box::new(move |v, out| out.put_i64_le(get(v))),
            Box::new(|input| FieldValue::Int64(input.get_i64_le())),
        )
    }

    /// Adds a `float` field.
    #[must_use]
    pub fn float32(self, name: &str, get: impl Fn(&T) -> f32 + Send + Sync + 'static) -> Self {
        self.push(
            name,
            "float",
            4,
            Box::new(move |v, out| out.put_f32_le(get(v))),
            Box::new(|input| FieldValue::Float32(input.get_f32_le())),
        )
    }

    /// Adds a `double` field.
    #[must_use]
    pub fn float64(self, name: &str, get: impl Fn(&T) -> f64 + Send + Sync + 'static) -> Self {
        self.push(
            name,
            "double",
            8,
            Box::new(move |v, out| out.put_f64_le(get(v))),
            Box::new(|input| FieldValue::Float64(input.get_f64_le())),
        )
    }

    /// Adds an enum field packed as its `int32` ordinal.
    #[must_use]
    pub fn enumeration<E: LogEnum>(
        self,
        name: &str,
        get: impl Fn(&T) -> E + Send + Sync + 'static,
    ) -> Self {
        let variants = E::variants()
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{}={i}", v.name()))
            .collect::<Vec<_>>()
            .join(", ");
        let declaration = format!("enum {{{variants}}} int32");
        self.push(
            name,
            &declaration,
            4,
            Box::new(move |v, out| {
                let ordinal = i32::try_from(get(v).ordinal()).unwrap_or(i32::MAX);
                out.put_i32_le(ordinal);
            }),
            Box::new(|input| FieldValue::Int32(input.get_i32_le())),
        )
    }

    /// Adds a nested struct field.
    #[must_use]
    pub fn nested<N: StructSerializable>(
        mut self,
        name: &str,
        get: impl for<'a> Fn(&'a T) -> &'a N + Send + Sync + 'static,
    ) -> Self {
        let codec = match N::struct_codec() {
            Ok(codec) => codec,
            Err(err) => {
                self.fail(err);
                return self;
            }
        };
        let declaration = codec.type_name().to_string();
        let size = codec.size();
        self.nested.push(super::schema_of(codec.clone()));
        let reader = codec.clone();
        self.push(
            name,
            &declaration,
            size,
            Box::new(move |v, out| codec.pack(out, get(v))),
            Box::new(move |input| {
                reader
                    .unpack(input)
                    .map_or(FieldValue::Missing, |n| FieldValue::Nested(Box::new(n)))
            }),
        )
    }

    /// Records a field whose type cannot be packed.
    ///
    /// The field is logged and left out of the layout. The constructor
    /// still sees it as [`FieldValue::Missing`] so positions stay aligned.
    #[must_use]
    pub fn unsupported(mut self, name: &str, type_desc: &str) -> Self {
        tracing::error!(
            record = self.type_name,
            field = name,
            field_type = type_desc,
            "unsupported record field skipped"
        );
        self.names.push(name.to_string());
        self.slots.push(Slot {
            size: 0,
            write: Box::new(|_, _| {}),
            read: Box::new(|_| FieldValue::Missing),
        });
        self
    }

    /// Sets the constructor used when unpacking.
    ///
    /// Without one the codec can pack but not unpack.
    #[must_use]
    pub fn constructor(
        mut self,
        build: impl Fn(&mut FieldValues) -> Option<T> + Send + Sync + 'static,
    ) -> Self {
        self.constructor = Some(Box::new(build));
        self
    }
}

thread_local! {
    static DERIVING: RefCell<Vec<(TypeId, &'static str)>> = const { RefCell::new(Vec::new()) };
}

struct DerivingGuard;

impl Drop for DerivingGuard {
    fn drop(&mut self) {
        DERIVING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

fn enter_derivation<T: 'static>(type_name: &'static str) -> CodecResult<DerivingGuard> {
    DERIVING.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.iter().any(|(id, _)| *id == TypeId::of::<T>()) {
            let chain = stack.iter().map(|(_, name)| format!("struct:{name}")).collect();
            return Err(CodecError::circular_reference(format!("struct:{type_name}"), chain));
        }
        stack.push((TypeId::of::<T>(), type_name));
        Ok(DerivingGuard)
    })
}

/// A struct codec derived from a [`Record`] field list.
pub struct RecordStruct<T> {
    type_name: &'static str,
    schema: String,
    size: usize,
    slots: Vec<Slot<T>>,
    nested: Vec<Arc<dyn StructSchema>>,
    constructor: Option<Constructor<T>>,
}

impl<T: Record> RecordStruct<T> {
    /// Derives the codec for `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::CircularReference`] if `T` nests itself,
    /// directly or through other records, and [`CodecError::Derivation`]
    /// for a malformed field list.
    pub fn derive() -> CodecResult<Self> {
        let _guard = enter_derivation::<T>(T::TYPE_NAME)?;
        let fields = T::fields(FieldList::new(T::TYPE_NAME));
        if let Some(err) = fields.error {
            return Err(err);
        }
        Ok(Self {
            type_name: fields.type_name,
            schema: fields.schema,
            size: fields.size,
            slots: fields.slots,
            nested: fields.nested,
            constructor: fields.constructor,
        })
    }
}

impl<T> RecordStruct<T> {
    /// Returns true if this codec can unpack values.
    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.constructor.is_some()
    }
}

impl<T> StructSchema for RecordStruct<T> {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn size(&self) -> usize {
        self.size
    }

    fn schema(&self) -> &str {
        &self.schema
    }

    fn nested(&self) -> Vec<Arc<dyn StructSchema>> {
        self.nested.clone()
    }
}

impl<T> StructCodec<T> for RecordStruct<T> {
    fn pack(&self, out: &mut BytesMut, value: &T) {
        for slot in &self.slots {
            (slot.write)(value, out);
        }
    }

    fn unpack(&self, input: &mut &[u8]) -> Option<T> {
        let constructor = self.constructor.as_ref()?;
        if input.len() < self.size {
            return None;
        }
        let mut values = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let current = *input;
            let (mut field, rest) = current.split_at(slot.size);
            values.push((slot.read)(&mut field));
            *input = rest;
        }
        constructor(&mut FieldValues::new(values))
    }
}

/// Implements [`StructSerializable`] for a [`Record`] type by deriving its
/// codec.
#[macro_export]
macro_rules! record_struct {
    ($ty:ty) => {
        impl $crate::StructSerializable for $ty {
            fn struct_codec(
            ) -> $crate::CodecResult<::std::sync::Arc<dyn $crate::StructCodec<Self>>> {
                let codec: ::std::sync::Arc<dyn $crate::StructCodec<Self>> =
                    ::std::sync::Arc::new($crate::RecordStruct::<Self>::derive()?);
                Ok(codec)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::collect_schemas;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Side {
        Left,
        Right,
    }
    crate::log_enum!(Side { Left, Right });

    #[derive(Debug, Clone, PartialEq)]
    struct Translation {
        x: f64,
        y: f64,
    }

    impl Record for Translation {
        const TYPE_NAME: &'static str = "Translation";

        fn fields(fields: FieldList<Self>) -> FieldList<Self> {
            fields
                .float64("x", |t| t.x)
                .float64("y", |t| t.y)
                .constructor(|v| {
                    Some(Translation {
                        x: v.float64()?,
                        y: v.float64()?,
                    })
                })
        }
    }
    crate::record_struct!(Translation);

    #[derive(Debug, Clone, PartialEq)]
    struct Target {
        position: Translation,
        side: Side,
        id: i16,
        weight: f32,
        seen: bool,
        count: i64,
    }

    impl Record for Target {
        const TYPE_NAME: &'static str = "Target";

        fn fields(fields: FieldList<Self>) -> FieldList<Self> {
            fields
                .nested("position", |t| &t.position)
                .enumeration("side", |t| t.side)
                .int16("id", |t| t.id)
                .float32("weight", |t| t.weight)
                .boolean("seen", |t| t.seen)
                .int64("count", |t| t.count)
                .constructor(|v| {
                    Some(Target {
                        position: v.nested()?,
                        side: v.enumeration()?,
                        id: v.int16()?,
                        weight: v.float32()?,
                        seen: v.boolean()?,
                        count: v.int64()?,
                    })
                })
        }
    }
    crate::record_struct!(Target);

    struct Ping {
        pong: Box<Pong>,
    }

    struct Pong {
        ping: Box<Ping>,
    }

    impl Record for Ping {
        const TYPE_NAME: &'static str = "Ping";

        fn fields(fields: FieldList<Self>) -> FieldList<Self> {
            fields.nested("pong", |p| p.pong.as_ref())
        }
    }
    crate::record_struct!(Ping);

    impl Record for Pong {
        const TYPE_NAME: &'static str = "Pong";

        fn fields(fields: FieldList<Self>) -> FieldList<Self> {
            fields.nested("ping", |p| p.ping.as_ref())
        }
    }
    crate::record_struct!(Pong);

    struct Sample {
        value: f64,
    }

    impl Record for Sample {
        const TYPE_NAME: &'static str = "Sample";

        fn fields(fields: FieldList<Self>) -> FieldList<Self> {
            fields
                .float64("value", |s| s.value)
                .unsupported("label", "String")
                .constructor(|v| {
                    let value = v.float64()?;
                    v.skip();
                    Some(Sample { value })
                })
        }
    }

    struct WriteOnly {
        level: i32,
    }

    impl Record for WriteOnly {
        const TYPE_NAME: &'static str = "WriteOnly";

        fn fields(fields: FieldList<Self>) -> FieldList<Self> {
            fields.int32("level", |w| w.level)
        }
    }

    fn target() -> Target {
        Target {
            position: Translation { x: 1.5, y: -2.0 },
            side: Side::Right,
            id: 7,
            weight: 0.25,
            seen: true,
            count: -9,
        }
    }

    #[test]
    fn derived_layout() {
        let codec = RecordStruct::<Target>::derive().unwrap();
        assert_eq!(codec.size(), 16 + 4 + 2 + 4 + 1 + 8);
        assert_eq!(
            codec.schema(),
            "Translation position;enum {Left=0, Right=1} int32 side;int16 id;float weight;bool seen;int64 count;"
        );
        assert_eq!(codec.type_string(), "struct:Target");
        assert_eq!(codec.nested().len(), 1);
    }

    #[test]
    fn pack_unpack_nested_record() {
        let codec = RecordStruct::<Target>::derive().unwrap();
        let mut buf = BytesMut::new();
        codec.pack(&mut buf, &target());
        assert_eq!(buf.len(), codec.size());
        assert_eq!(&buf[..8], &1.5f64.to_le_bytes());

        let mut input = &buf[..];
        assert_eq!(codec.unpack(&mut input), Some(target()));
        assert!(input.is_empty());
    }

    #[test]
    fn unpack_short_input_is_none() {
        let codec = RecordStruct::<Translation>::derive().unwrap();
        let mut input: &[u8] = &[0u8; 15];
        assert_eq!(codec.unpack(&mut input), None);
    }

    #[test]
    fn schema_entries_include_nested() {
        let codec = RecordStruct::<Target>::derive().unwrap();
        let entries = collect_schemas(&codec, |_| false).unwrap();
        let names: Vec<_> = entries.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(names, vec!["struct:Translation", "struct:Target"]);
    }

    #[test]
    fn mutual_nesting_fails_derivation() {
        let err = RecordStruct::<Ping>::derive().err().unwrap();
        assert_eq!(
            err.to_string(),
            "struct:Ping: circular reference with [struct:Ping, struct:Pong]"
        );
        // Every attempt fails the same way.
        assert!(Pong::struct_codec().is_err());
        assert!(Ping::struct_codec().is_err());
    }

    #[test]
    fn unsupported_field_is_skipped() {
        let codec = RecordStruct::<Sample>::derive().unwrap();
        assert_eq!(codec.size(), 8);
        assert_eq!(codec.schema(), "double value;");

        let mut buf = BytesMut::new();
        codec.pack(&mut buf, &Sample { value: 4.0 });
        let mut input = &buf[..];
        assert_eq!(codec.unpack(&mut input).map(|s| s.value), Some(4.0));
    }

    #[test]
    fn missing_constructor_is_write_only() {
        let codec = RecordStruct::<WriteOnly>::derive().unwrap();
        assert!(!codec.is_readable());

        let mut buf = BytesMut::new();
        codec.pack(&mut buf, &WriteOnly { level: 3 });
        assert_eq!(&buf[..], &3i32.to_le_bytes());
        let mut input = &buf[..];
        assert!(codec.unpack(&mut input).is_none());
    }

    proptest::proptest! {
        #[test]
        fn packed_targets_unpack_unchanged(
            x in -1.0e9f64..1.0e9,
            y in -1.0e9f64..1.0e9,
            right in proptest::bool::ANY,
            id in proptest::num::i16::ANY,
            weight in -1.0e6f32..1.0e6,
            seen in proptest::bool::ANY,
            count in proptest::num::i64::ANY,
        ) {
            let value = Target {
                position: Translation { x, y },
                side: if right { Side::Right } else { Side::Left },
                id,
                weight,
                seen,
                count,
            };
            let codec = RecordStruct::<Target>::derive().unwrap();
            let mut buf = BytesMut::new();
            codec.pack(&mut buf, &value);
            proptest::prop_assert_eq!(buf.len(), codec.size());
            let mut input = &buf[..];
            proptest::prop_assert_eq!(codec.unpack(&mut input), Some(value));
        }
    }

    #[test]
    fn duplicate_field_is_a_derivation_error() {
        struct Twice {
            a: f64,
        }
        impl Record for Twice {
            const TYPE_NAME: &'static str = "Twice";
            fn fields(fields: FieldList<Self>) -> FieldList<Self> {
                fields.float64("a", |t| t.a).float64("a", |t| t.a)
            }
        }
        assert!(matches!(
            RecordStruct::<Twice>::derive(),
            Err(CodecError::Derivation { .. })
        ));
    }
}
