//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while building or using a codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A struct schema refers back to a type that is still being expanded.
    #[error("{type_string}: circular reference with [{}]", .chain.join(", "))]
    CircularReference {
        /// The type string that closed the cycle.
        type_string: String,
        /// Type strings being expanded when the cycle was found, outermost first.
        chain: Vec<String>,
    },

    /// Fewer bytes were available than the codec needs.
    #[error("buffer underflow: needed {needed} bytes, {available} available")]
    BufferUnderflow {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A value or field has a type the codec cannot represent.
    #[error("unsupported type: {type_name}")]
    UnsupportedType {
        /// Name of the unsupported type.
        type_name: String,
    },

    /// A record codec could not be derived.
    #[error("derivation of {type_name} failed: {message}")]
    Derivation {
        /// The record type being derived.
        type_name: String,
        /// Description of the failure.
        message: String,
    },
}

impl CodecError {
    /// Create a circular reference error.
    pub fn circular_reference(type_string: impl Into<String>, chain: Vec<String>) -> Self {
        Self::CircularReference {
            type_string: type_string.into(),
            chain,
        }
    }

    /// Create a buffer underflow error.
    pub fn buffer_underflow(needed: usize, available: usize) -> Self {
        Self::BufferUnderflow { needed, available }
    }

    /// Create an unsupported type error.
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    /// Create a derivation error.
    pub fn derivation(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Derivation {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_reference_names_chain() {
        let err = CodecError::circular_reference(
            "struct:A",
            vec!["struct:A".to_string(), "struct:B".to_string()],
        );
        assert_eq!(
            err.to_string(),
            "struct:A: circular reference with [struct:A, struct:B]"
        );
    }
}
