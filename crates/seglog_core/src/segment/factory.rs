//! Opening backends for segment files.

use seglog_storage::{FileBackend, StorageBackend, StorageResult};
use std::fmt;
use std::path::Path;

/// Opens the storage backend behind a segment file.
///
/// The journal decides names and lifetimes of segment files; a factory only
/// turns a path into a byte store. Tests plug in factories that inject faults.
pub trait SegmentFactory: Send + Sync + fmt::Debug {
    /// Opens or creates the backend for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened.
    fn open(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>>;

    /// Removes the backend for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend exists but cannot be removed.
    fn remove(&self, path: &Path) -> StorageResult<()>;
}

/// Segment factory backed by plain files.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSegmentFactory;

impl SegmentFactory for FileSegmentFactory {
    fn open(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FileBackend::open(path)?))
    }

    fn remove(&self, path: &Path) -> StorageResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_factory_opens_and_removes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j-1.log");

        let mut backend = FileSegmentFactory.open(&path).unwrap();
        backend.append(b"abc").unwrap();
        backend.flush().unwrap();
        drop(backend);

        let backend = FileSegmentFactory.open(&path).unwrap();
        assert_eq!(backend.read_at(0, 3).unwrap(), b"abc");
        drop(backend);

        FileSegmentFactory.remove(&path).unwrap();
        assert!(!path.exists());
        // Removing twice is fine
        FileSegmentFactory.remove(&path).unwrap();
    }
}
