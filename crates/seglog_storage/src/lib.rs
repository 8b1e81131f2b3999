//! # seglog storage
//!
//! Storage backend trait, implementations and space preallocation for the
//! seglog journal.
//!
//! This crate provides the lowest-level storage abstraction. Storage backends
//! are **opaque byte stores** - they do not interpret the data they store.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush, reserve)
//! - No knowledge of segment descriptors, frames or record indices
//! - Must be `Send + Sync` so sealed segments can be read concurrently
//! - Platform error codes are classified here, once, and never leak upward
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Preallocation
//!
//! [`PlatformPreallocator`] reserves file regions through the platform call
//! ([`PlatformFs`]) and degrades to [`zero_fill`] for the rest of its life the
//! first time the platform reports the call as unsupported.
//!
//! ## Example
//!
//! ```rust
//! use seglog_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod prealloc;

pub use backend::StorageBackend;
pub use error::{PlatformCode, PreallocateError, StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use prealloc::{zero_fill, NativePlatformFs, PlatformFs, PlatformPreallocator, Preallocation};
