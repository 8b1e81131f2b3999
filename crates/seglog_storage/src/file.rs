//! Backend over a single file on disk.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::prealloc::{zero_fill, PlatformPreallocator, Preallocation};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Open file plus the two lengths the backend tracks.
#[derive(Debug)]
struct FileState {
    file: File,
    /// Logical write position.
    size: u64,
    /// Physical file length, reserved space included.
    capacity: u64,
}

/// A storage backend over one file.
///
/// A reserved file is longer than the data written into it, so the write
/// position (`size`) and the readable length (`capacity`) are tracked apart.
/// Opening an existing file puts both at the file's length; the owner is
/// expected to find its real end and [`truncate`](StorageBackend::truncate)
/// to it.
///
/// `flush` syncs data only, `sync` syncs data and metadata.
///
/// # Example
///
/// ```no_run
/// use seglog_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("segment.log")).unwrap();
/// backend.append(b"frame").unwrap();
/// backend.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileBackend {
    /// Opens the file at `path`, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FileState {
                file,
                size: len,
                capacity: len,
            }),
        })
    }

    /// Returns the file's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.state.lock();
        let end = offset.saturating_add(len as u64);
        if end > state.capacity {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: state.capacity,
            });
        }

        let mut buf = vec![0u8; len];
        if len > 0 {
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let state = self.state.get_mut();
        let offset = state.size;
        if data.is_empty() {
            return Ok(offset);
        }

        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        state.size = offset + data.len() as u64;
        state.capacity = state.capacity.max(state.size);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let state = self.state.get_mut();
        state.file.flush()?;
        state.file.sync_data()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.state.lock().size)
    }

    fn capacity(&self) -> StorageResult<u64> {
        Ok(self.state.lock().capacity)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.state.get_mut().file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let state = self.state.get_mut();
        if new_size > state.size {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot truncate to {new_size}, only {} bytes written", state.size),
            )));
        }

        // Cuts reserved space too; the owner re-reserves if it needs it.
        state.file.set_len(new_size)?;
        state.file.sync_all()?;
        state.size = new_size;
        state.capacity = new_size;
        Ok(())
    }

    fn reserve(
        &mut self,
        offset: u64,
        len: u64,
        preallocator: &PlatformPreallocator,
    ) -> StorageResult<()> {
        let state = self.state.get_mut();
        if preallocator.preallocate(&state.file, offset, len)? == Preallocation::Disabled {
            zero_fill(&state.file, offset, len)?;
        }

        // Whether reserving grew the file is up to the platform, so ask it.
        state.capacity = state.file.metadata()?.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn open_temp() -> (TempDir, PathBuf, FileBackend) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("segment.log");
        let backend = FileBackend::open(&path).unwrap();
        (dir, path, backend)
    }

    #[test]
    fn open_creates_empty_file() {
        let (_dir, path, backend) = open_temp();
        assert!(path.exists());
        assert_eq!(backend.path(), path);
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.capacity().unwrap(), 0);
    }

    #[test]
    fn appends_are_positioned_and_readable() {
        let (_dir, _path, mut backend) = open_temp();
        assert_eq!(backend.append(b"descriptor").unwrap(), 0);
        assert_eq!(backend.append(b"").unwrap(), 10);
        assert_eq!(backend.append(b"frame-1").unwrap(), 10);

        assert_eq!(backend.read_at(10, 7).unwrap(), b"frame-1");
        assert!(backend.read_at(15, 0).unwrap().is_empty());
        assert!(matches!(
            backend.read_at(12, 10),
            Err(StorageError::ReadPastEnd { size: 17, .. })
        ));
    }

    #[test]
    fn reopen_starts_at_file_length() {
        let (_dir, path, mut backend) = open_temp();
        backend.append(b"durable").unwrap();
        backend.flush().unwrap();
        drop(backend);

        let mut backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 7);
        assert_eq!(backend.append(b"!").unwrap(), 7);
        backend.sync().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"durable!");
    }

    #[test]
    fn reserve_keeps_write_position() {
        let (_dir, _path, mut backend) = open_temp();
        backend.append(b"head").unwrap();
        backend
            .reserve(4, 4096, &PlatformPreallocator::new())
            .unwrap();

        assert_eq!(backend.size().unwrap(), 4);
        assert!(backend.capacity().unwrap() >= 4100);

        // Reserved space reads back as zeros
        let tail = backend.read_at(4, 16).unwrap();
        assert!(tail.iter().all(|&b| b == 0));

        assert_eq!(backend.append(b"next").unwrap(), 4);
        assert_eq!(&backend.read_at(0, 8).unwrap(), b"headnext");
    }

    #[test]
    fn reserve_with_zero_fill_fallback() {
        let (_dir, path, mut backend) = open_temp();
        backend
            .reserve(0, 1000, &PlatformPreallocator::disabled())
            .unwrap();

        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.capacity().unwrap(), 1000);
        assert_eq!(std::fs::metadata(path).unwrap().len(), 1000);
    }

    #[test]
    fn truncate_cuts_data_and_reservation() {
        let (_dir, _path, mut backend) = open_temp();
        backend.append(b"frame-1frame-2").unwrap();
        backend
            .reserve(14, 100, &PlatformPreallocator::disabled())
            .unwrap();

        backend.truncate(7).unwrap();
        assert_eq!(backend.size().unwrap(), 7);
        assert_eq!(backend.capacity().unwrap(), 7);
        assert!(backend.truncate(8).is_err());

        backend.append(b"frame-3").unwrap();
        assert_eq!(&backend.read_at(0, 14).unwrap(), b"frame-1frame-3");
    }
}
