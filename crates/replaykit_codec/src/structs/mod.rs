//! Fixed-size struct codecs.
//!
//! A struct codec packs a Rust value into the WPILib struct layout: a
//! fixed number of little-endian bytes described by a schema string such
//! as `double x;double y;`. Codecs come from two places:
//!
//! - hand-written [`StructCodec`] impls, for types with an established
//!   layout;
//! - [`RecordStruct`], which derives a codec from a [`Record`] field list.
//!
//! Every type a codec references is published once per log as a
//! `structschema` entry. [`collect_schemas`] walks the nested codecs
//! depth-first and rejects cycles.

mod record;
mod registry;

pub use record::{FieldList, FieldValue, FieldValues, Record, RecordStruct};
pub use registry::StructRegistry;

use crate::error::{CodecError, CodecResult};
use bytes::BytesMut;
use std::sync::Arc;

/// Type tag stored on schema entries.
pub const SCHEMA_CUSTOM_TYPE: &str = "structschema";

/// Key prefix under which schema entries are stored.
pub const SCHEMA_KEY_PREFIX: &str = "/.schema/";

/// Type-independent part of a struct codec.
pub trait StructSchema: Send + Sync {
    /// The struct type name, e.g. `Pose2d`.
    fn type_name(&self) -> &str;

    /// The type string used as the custom type of packed values.
    fn type_string(&self) -> String {
        format!("struct:{}", self.type_name())
    }

    /// Packed size in bytes.
    fn size(&self) -> usize;

    /// Schema text, a sequence of `type name;` declarations.
    fn schema(&self) -> &str;

    /// Codecs of the struct types this schema refers to.
    fn nested(&self) -> Vec<Arc<dyn StructSchema>> {
        Vec::new()
    }
}

/// Packs and unpacks values of `T`.
pub trait StructCodec<T>: StructSchema {
    /// Appends exactly [`size`](StructSchema::size) bytes for `value`.
    fn pack(&self, out: &mut BytesMut, value: &T);

    /// Reads one value from the front of `input`, advancing it.
    ///
    /// Returns `None` if fewer than `size` bytes remain or the codec is
    /// write-only.
    fn unpack(&self, input: &mut &[u8]) -> Option<T>;
}

/// A type with a struct codec.
pub trait StructSerializable: Sized + Send + 'static {
    /// Builds the codec for this type.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec cannot be derived, e.g. because the
    /// type nests itself.
    fn struct_codec() -> CodecResult<Arc<dyn StructCodec<Self>>>;
}

struct SchemaOf<T>(Arc<dyn StructCodec<T>>);

impl<T> StructSchema for SchemaOf<T> {
    fn type_name(&self) -> &str {
        self.0.type_name()
    }

    fn type_string(&self) -> String {
        self.0.type_string()
    }

    fn size(&self) -> usize {
        self.0.size()
    }

    fn schema(&self) -> &str {
        self.0.schema()
    }

    fn nested(&self) -> Vec<Arc<dyn StructSchema>> {
        self.0.nested()
    }
}

/// Views a typed codec as its schema.
pub fn schema_of<T: 'static>(codec: Arc<dyn StructCodec<T>>) -> Arc<dyn StructSchema> {
    Arc::new(SchemaOf(codec))
}

/// Returns the table key of the schema entry for `type_string`.
#[must_use]
pub fn schema_key(type_string: &str) -> String {
    format!("{SCHEMA_KEY_PREFIX}{type_string}")
}

/// Collects the schema entries `root` needs, dependencies first.
///
/// `is_present` reports type strings already published; those and their
/// nested types are skipped. Nothing is returned unless the whole walk
/// succeeds.
///
/// # Errors
///
/// Returns [`CodecError::CircularReference`] if a type is reached again
/// while it is still being expanded.
pub fn collect_schemas<S>(
    root: &S,
    is_present: impl Fn(&str) -> bool,
) -> CodecResult<Vec<(String, String)>>
where
    S: StructSchema + ?Sized,
{
    let mut expanding = Vec::new();
    let mut collected = Vec::new();
    walk(root, &is_present, &mut expanding, &mut collected)?;
    Ok(collected)
}

fn walk<S>(
    schema: &S,
    is_present: &dyn Fn(&str) -> bool,
    expanding: &mut Vec<String>,
    collected: &mut Vec<(String, String)>,
) -> CodecResult<()>
where
    S: StructSchema + ?Sized,
{
    let type_string = schema.type_string();
    if expanding.contains(&type_string) {
        return Err(CodecError::circular_reference(type_string, expanding.clone()));
    }
    if is_present(&type_string) || collected.iter().any(|(t, _)| *t == type_string) {
        return Ok(());
    }

    expanding.push(type_string.clone());
    for nested in schema.nested() {
        walk(nested.as_ref(), is_present, expanding, collected)?;
    }
    expanding.pop();

    collected.push((type_string, schema.schema().to_string()));
    Ok(())
}
