//! Per-engine codec cache and buffer pool.

use super::{StructCodec, StructSerializable};
use crate::error::CodecResult;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Caches struct codecs by Rust type and pools pack buffers by type string.
///
/// One registry belongs to one logger and is shared by all of its tables.
/// Failed derivations are not cached, so a broken type fails on every use.
#[derive(Default)]
pub struct StructRegistry {
    codecs: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    buffers: Mutex<HashMap<String, BytesMut>>,
}

impl StructRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the codec for `T`, building and caching it on first use.
    ///
    /// # Errors
    ///
    /// Returns the error from [`StructSerializable::struct_codec`].
    pub fn codec<T: StructSerializable>(&self) -> CodecResult<Arc<dyn StructCodec<T>>> {
        let id = TypeId::of::<T>();
        if let Some(cached) = self
            .codecs
            .lock()
            .get(&id)
            .and_then(|entry| entry.downcast_ref::<Arc<dyn StructCodec<T>>>())
        {
            return Ok(Arc::clone(cached));
        }

        // Not held across derivation.
        let codec = T::struct_codec()?;
        self.codecs.lock().insert(id, Arc::new(Arc::clone(&codec)));
        Ok(codec)
    }

    /// Number of cached codecs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codecs.lock().len()
    }

    /// Returns true if no codec has been cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packs one value using the pooled buffer for its type string.
    pub fn pack<T>(&self, codec: &dyn StructCodec<T>, value: &T) -> Vec<u8> {
        self.with_buffer(&codec.type_string(), codec.size(), |buf| {
            codec.pack(buf, value);
        })
    }

    /// Packs values back to back using the pooled buffer for the array
    /// type string.
    pub fn pack_array<T>(&self, codec: &dyn StructCodec<T>, values: &[T]) -> Vec<u8> {
        let type_string = format!("{}[]", codec.type_string());
        self.with_buffer(&type_string, codec.size() * values.len(), |buf| {
            for value in values {
                codec.pack(buf, value);
            }
        })
    }

    fn with_buffer(&self, type_string: &str, capacity: usize, fill: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
        let mut buf = self.buffers.lock().remove(type_string).unwrap_or_default();
        buf.clear();
        buf.reserve(capacity);
        fill(&mut buf);
        let packed = buf.to_vec();
        self.buffers.lock().insert(type_string.to_string(), buf);
        packed
    }
}

impl std::fmt::Debug for StructRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructRegistry")
            .field("codecs", &self.len())
            .field("buffers", &self.buffers.lock().len())
            .finish()
    }
}
