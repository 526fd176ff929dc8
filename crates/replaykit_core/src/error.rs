//! Error types for ReplayKit core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ReplayKit core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] replaykit_storage::StorageError),

    /// Struct codec error.
    #[error("codec error: {0}")]
    Codec(#[from] replaykit_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Metadata serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Log file header is missing or not understood.
    #[error("invalid log format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Log file contents are damaged.
    #[error("log corruption at offset {offset}: {message}")]
    LogCorruption {
        /// Byte offset of the damaged record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The snapshot queue is closed.
    #[error("snapshot queue closed")]
    QueueClosed,

    /// A background thread could not be spawned or joined.
    #[error("thread error: {message}")]
    Thread {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a thread error.
    pub fn thread(message: impl Into<String>) -> Self {
        Self::Thread {
            message: message.into(),
        }
    }
}
