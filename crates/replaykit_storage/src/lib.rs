//! # ReplayKit Storage
//!
//! Byte store backends for ReplayKit log files.
//!
//! Backends are **opaque byte stores**: they append and read bytes and know
//! nothing about the WPILOG format layered on top of them by
//! `replaykit_core`.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - Log files on disk
//! - [`InMemoryBackend`] - Shared in-memory buffers for tests and tooling
//!
//! ## Example
//!
//! ```rust
//! use replaykit_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"WPILOG").unwrap();
//! let data = backend.read_at(offset, 6).unwrap();
//! assert_eq!(&data, b"WPILOG");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
