//! Crash simulation for journal tests.
//!
//! [`CrashableBackend`] holds appended bytes in memory until they are
//! flushed, the way a page cache does. Dropping it without a flush loses
//! them, which is what a power failure does to unflushed writes. Faults are
//! armed through a shared [`CrashControl`]:
//!
//! - **Torn write** - the write crossing a byte budget reaches the disk only
//!   partially, then every later operation fails
//! - **Failing flush** - `flush` and `sync` fail and nothing new becomes durable
//! - **Out of space** - `reserve` fails the way a full disk does
//! - **Failing remove** - [`CrashableFactory`] refuses to delete segment files
//!   once a number of removals succeeded
//!
//! [`CrashableFactory`] hands out such backends for real segment files, so a
//! journal can be crashed, dropped and reopened from disk.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use seglog_core::{Journal, JournalConfig, ASQN_IGNORE};
//! use seglog_storage::PlatformPreallocator;
//! use seglog_testkit::CrashableFactory;
//! use std::sync::Arc;
//!
//! let factory = CrashableFactory::new();
//! let control = factory.control();
//! let config = JournalConfig::new("journal-dir");
//!
//! let mut journal = Journal::open_with(
//!     config.clone(),
//!     Arc::new(factory),
//!     Arc::new(PlatformPreallocator::new()),
//! )?;
//! journal.append(ASQN_IGNORE, b"durable".to_vec())?;
//! journal.flush()?;
//!
//! control.crash_after(10);
//! let _ = journal.append(ASQN_IGNORE, b"torn".to_vec());
//! drop(journal);
//!
//! let journal = Journal::open(config)?;
//! assert_eq!(journal.last_index(), 1);
//! # Ok::<(), seglog_core::JournalError>(())
//! ```

use parking_lot::Mutex;
use seglog_core::{FileSegmentFactory, SegmentFactory};
use seglog_storage::{
    FileBackend, PlatformPreallocator, PreallocateError, StorageBackend, StorageError,
    StorageResult,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Faults shared by every backend of one [`CrashableFactory`].
#[derive(Debug)]
pub struct CrashControl {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
    out_of_space: AtomicBool,
    removes_left: AtomicUsize,
}

impl Default for CrashControl {
    fn default() -> Self {
        Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_flush: AtomicBool::new(false),
            out_of_space: AtomicBool::new(false),
            removes_left: AtomicUsize::new(usize::MAX),
        }
    }
}

impl CrashControl {
    /// Creates a control with no faults armed.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: usize) {
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether `flush` and `sync` fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Sets whether `reserve` reports a full disk.
    pub fn set_out_of_space(&self, full: bool) {
        self.out_of_space.store(full, Ordering::SeqCst);
    }

    /// Lets `count` more segment files be removed, then fails every removal.
    pub fn fail_remove_after(&self, count: usize) {
        self.removes_left.store(count, Ordering::SeqCst);
    }

    /// Takes one removal from the budget, or fails if none is left.
    fn take_remove(&self) -> StorageResult<()> {
        self.removes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .map(|_| ())
            .map_err(|_| simulated("remove failure"))
    }

    /// Returns whether a simulated crash has happened.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Disarms every fault and forgets any crash.
    pub fn reset(&self) {
        self.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_flush.store(false, Ordering::SeqCst);
        self.out_of_space.store(false, Ordering::SeqCst);
        self.removes_left.store(usize::MAX, Ordering::SeqCst);
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("simulated {what}"),
    ))
}

/// A storage backend that buffers unflushed writes and can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    control: Arc<CrashControl>,
    /// Appended bytes not yet handed to `inner`.
    pending: Vec<u8>,
    /// Offset of `pending[0]`, equal to the inner write position.
    pending_offset: u64,
}

impl CrashableBackend {
    /// Wraps `inner` with its own, unarmed control.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self::with_control(inner, CrashControl::new())
    }

    /// Wraps `inner`, taking faults from `control`.
    pub fn with_control(inner: Box<dyn StorageBackend>, control: Arc<CrashControl>) -> Self {
        let pending_offset = inner.size().unwrap_or(0);
        Self {
            inner,
            control,
            pending: Vec::new(),
            pending_offset,
        }
    }

    /// Returns the control arming this backend's faults.
    #[must_use]
    pub fn control(&self) -> Arc<CrashControl> {
        Arc::clone(&self.control)
    }

    /// Returns the number of appended bytes that are not yet durable.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn check_crashed(&self) -> StorageResult<()> {
        if self.control.has_crashed() {
            return Err(simulated("crash: backend is gone"));
        }
        Ok(())
    }

    /// Hands buffered bytes to the inner backend.
    fn write_back(&mut self) -> StorageResult<()> {
        if !self.pending.is_empty() {
            self.inner.append(&self.pending)?;
            self.pending.clear();
        }
        self.pending_offset = self.inner.size()?;
        Ok(())
    }

    fn pending_end(&self) -> u64 {
        self.pending_offset + self.pending.len() as u64
    }
}

impl std::fmt::Debug for CrashableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashableBackend")
            .field("pending", &self.pending.len())
            .field("pending_offset", &self.pending_offset)
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        if self.pending.is_empty() {
            return self.inner.read_at(offset, len);
        }

        let end = offset.saturating_add(len as u64);
        let inner_capacity = self.inner.capacity()?;
        let size = inner_capacity.max(self.pending_end());
        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let mut out = vec![0u8; len];
        if offset < inner_capacity {
            let n = (end.min(inner_capacity) - offset) as usize;
            out[..n].copy_from_slice(&self.inner.read_at(offset, n)?);
        }

        let start = offset.max(self.pending_offset);
        let stop = end.min(self.pending_end());
        if start < stop {
            let from = (start - self.pending_offset) as usize;
            let to = (stop - self.pending_offset) as usize;
            let at = (start - offset) as usize;
            out[at..at + (to - from)].copy_from_slice(&self.pending[from..to]);
        }
        Ok(out)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        self.check_crashed()?;

        let written = self.control.bytes_written.fetch_add(bytes.len(), Ordering::SeqCst);
        let threshold = self.control.crash_after_bytes.load(Ordering::SeqCst);
        if written.saturating_add(bytes.len()) > threshold {
            // The bytes before the crash point reach the disk, the rest never do
            let partial = threshold.saturating_sub(written).min(bytes.len());
            self.pending.extend_from_slice(&bytes[..partial]);
            let _ = self.write_back();
            let _ = self.inner.flush();
            self.control.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("crash during write"));
        }

        let offset = self.pending_end();
        self.pending.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_crashed()?;
        if self.control.fail_on_flush.load(Ordering::SeqCst) {
            return Err(simulated("flush failure"));
        }
        self.write_back()?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.pending_end())
    }

    fn capacity(&self) -> StorageResult<u64> {
        Ok(self.inner.capacity()?.max(self.pending_end()))
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_crashed()?;
        if self.control.fail_on_flush.load(Ordering::SeqCst) {
            return Err(simulated("sync failure"));
        }
        self.write_back()?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_crashed()?;
        if new_size >= self.pending_offset {
            if new_size > self.pending_end() {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("cannot truncate to size {new_size} past {}", self.pending_end()),
                )));
            }
            self.pending.truncate((new_size - self.pending_offset) as usize);
            // Reserved space past the buffered bytes goes too
            let inner_size = self.inner.size()?;
            return self.inner.truncate(inner_size);
        }

        self.pending.clear();
        self.inner.truncate(new_size)?;
        self.pending_offset = new_size;
        Ok(())
    }

    fn reserve(
        &mut self,
        offset: u64,
        len: u64,
        preallocator: &PlatformPreallocator,
    ) -> StorageResult<()> {
        self.check_crashed()?;
        if self.control.out_of_space.load(Ordering::SeqCst) {
            return Err(PreallocateError::OutOfDiskSpace {
                offset,
                length: len,
            }
            .into());
        }
        self.inner.reserve(offset, len, preallocator)
    }
}

/// Segment factory handing out [`CrashableBackend`]s over real files.
///
/// Every backend shares the factory's [`CrashControl`]. Paths of opened
/// segments are recorded for inspection.
#[derive(Debug, Default)]
pub struct CrashableFactory {
    control: Arc<CrashControl>,
    opened: Mutex<Vec<PathBuf>>,
}

impl CrashableFactory {
    /// Creates a factory with no faults armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the control shared by every backend of this factory.
    #[must_use]
    pub fn control(&self) -> Arc<CrashControl> {
        Arc::clone(&self.control)
    }

    /// Returns the paths opened so far, in order.
    #[must_use]
    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().clone()
    }
}

impl SegmentFactory for CrashableFactory {
    fn open(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>> {
        self.opened.lock().push(path.to_path_buf());
        let inner = FileBackend::open(path)?;
        Ok(Box::new(CrashableBackend::with_control(
            Box::new(inner),
            Arc::clone(&self.control),
        )))
    }

    fn remove(&self, path: &Path) -> StorageResult<()> {
        self.control.take_remove()?;
        FileSegmentFactory.remove(path)
    }
}
