//! Storage backend trait definition.

use crate::error::StorageResult;
use crate::prealloc::PlatformPreallocator;

/// A growable, flushable byte sink bound to one file region.
///
/// Storage backends are **opaque byte stores**. The journal owns all
/// interpretation of the bytes; a backend knows nothing about descriptors,
/// frames or indices.
///
/// A backend has two lengths:
///
/// - `size` is the logical write position, where the next `append` lands
/// - `capacity` is how many bytes can be read, including reserved space
///   past the write position
///
/// # Invariants
///
/// - `append` writes at `size` and returns that offset
/// - `read_at` returns exactly the bytes previously written at that offset,
///   and zeros for reserved but unwritten space
/// - `flush` makes all appended data durable
/// - Backends must be `Send + Sync` so sealed segments can be shared by readers
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The read would extend beyond the capacity
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes data at the logical write position.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes all pending writes to durable storage.
    ///
    /// After this returns successfully, all previously appended data
    /// is guaranteed to survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the logical write position.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Returns the number of readable bytes, reserved space included.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity cannot be determined.
    fn capacity(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush` - it ensures that
    /// file metadata (size, timestamps) is also durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Discards everything at and after `new_size`, reserved space included.
    ///
    /// The write position moves back to `new_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The truncation fails
    /// - `new_size` is greater than the current size
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reserves `len` bytes starting at `offset`.
    ///
    /// Uses the preallocator when it is enabled and writes zeros over the
    /// region otherwise. The write position is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Preallocate`] with the classified failure,
    /// or an I/O error from the zero-fill fallback.
    fn reserve(
        &mut self,
        offset: u64,
        len: u64,
        preallocator: &PlatformPreallocator,
    ) -> StorageResult<()>;
}
