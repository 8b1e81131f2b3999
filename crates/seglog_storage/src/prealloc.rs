//! Platform space preallocation.
//!
//! Segment files reserve their full capacity up front so that a full disk is
//! reported when a segment is created rather than halfway through a record.
//!
//! ## Failure classes
//!
//! | Platform code           | Outcome                                         |
//! |-------------------------|-------------------------------------------------|
//! | interrupted             | `Err(Interrupted)`, caller retries the same call |
//! | not supported           | preallocator disables itself, `Ok(Disabled)`    |
//! | no space                | `Err(OutOfDiskSpace)`                           |
//! | invalid argument        | `Err(InvalidArgument)`                          |
//! | anything else           | `Err(Io)`                                       |
//!
//! Once disabled, a preallocator never calls the platform again and every
//! request answers `Ok(Disabled)`. Callers respond to `Disabled` by writing
//! zeros over the region with [`zero_fill`].

use crate::error::{PlatformCode, PreallocateError};
use std::fmt;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Chunk size used when zero-filling a region.
const ZERO_FILL_CHUNK: usize = 64 * 1024;

/// The raw "reserve file region" call of the host platform.
///
/// Implementations return the platform's code untouched; classification is
/// the job of [`PlatformPreallocator`].
pub trait PlatformFs: Send + Sync + fmt::Debug {
    /// Reserves `len` bytes of `file` starting at `offset`.
    fn allocate(&self, file: &File, offset: u64, len: u64) -> Result<(), PlatformCode>;
}

/// The host platform's preallocation call.
///
/// - Linux and Android: `posix_fallocate(2)`
/// - Other platforms supported by `fs2`: `fs2::FileExt::allocate`, which
///   reserves from the start of the file through `offset + len`
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePlatformFs;

impl PlatformFs for NativePlatformFs {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[allow(unsafe_code)]
    fn allocate(&self, file: &File, offset: u64, len: u64) -> Result<(), PlatformCode> {
        use std::os::unix::io::AsRawFd;

        let offset = libc::off_t::try_from(offset).map_err(|_| PlatformCode::InvalidArgument)?;
        let len = libc::off_t::try_from(len).map_err(|_| PlatformCode::InvalidArgument)?;

        // SAFETY: the descriptor is borrowed from a live `File` for the
        // duration of the call and posix_fallocate does not retain it.
        let ret = unsafe { libc::posix_fallocate(file.as_raw_fd(), offset, len) };

        // posix_fallocate reports failure through its return value, not errno.
        if ret == 0 {
            Ok(())
        } else {
            Err(PlatformCode::from_raw(ret))
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn allocate(&self, file: &File, offset: u64, len: u64) -> Result<(), PlatformCode> {
        use fs2::FileExt;

        let end = offset
            .checked_add(len)
            .ok_or(PlatformCode::InvalidArgument)?;
        file.allocate(end)
            .map_err(|e| PlatformCode::from_io_error(&e))
    }
}

/// What a successful [`PlatformPreallocator::preallocate`] call achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preallocation {
    /// The platform reserved the region.
    Reserved,
    /// Preallocation is unavailable; the caller must zero-fill the region itself.
    Disabled,
}

/// Reserves disk space for files through the platform call.
///
/// The only state is the enabled flag. It flips to disabled the first time
/// the platform reports that preallocation is unsupported and never flips back.
///
/// # Example
///
/// ```no_run
/// use seglog_storage::{zero_fill, PlatformPreallocator, Preallocation};
/// use std::fs::File;
///
/// let preallocator = PlatformPreallocator::new();
/// let file = File::create("segment.log").unwrap();
/// if preallocator.preallocate(&file, 0, 1 << 20).unwrap() == Preallocation::Disabled {
///     zero_fill(&file, 0, 1 << 20).unwrap();
/// }
/// ```
#[derive(Debug)]
pub struct PlatformPreallocator {
    enabled: AtomicBool,
    platform: Arc<dyn PlatformFs>,
}

impl Default for PlatformPreallocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformPreallocator {
    /// Creates an enabled preallocator backed by the host platform.
    #[must_use]
    pub fn new() -> Self {
        Self::with_platform(Arc::new(NativePlatformFs))
    }

    /// Creates an enabled preallocator backed by the given platform call.
    #[must_use]
    pub fn with_platform(platform: Arc<dyn PlatformFs>) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            platform,
        }
    }

    /// Creates a preallocator that never calls the platform.
    #[must_use]
    pub fn disabled() -> Self {
        let preallocator = Self::new();
        preallocator.enabled.store(false, Ordering::Release);
        preallocator
    }

    /// Returns whether the platform call is still in use.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Reserves `length` bytes of `file` starting at `offset`.
    ///
    /// The effect on the file's logical length is platform dependent.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `offset + length` is not a representable file
    ///   offset; the platform is not called
    /// - `Interrupted` if the call should be retried
    /// - `OutOfDiskSpace` if the device is full
    /// - `Io` for any other platform failure
    pub fn preallocate(
        &self,
        file: &File,
        offset: u64,
        length: u64,
    ) -> Result<Preallocation, PreallocateError> {
        let in_range = offset
            .checked_add(length)
            .is_some_and(|end| i64::try_from(end).is_ok());
        if !in_range {
            return Err(PreallocateError::InvalidArgument { offset, length });
        }

        if !self.is_enabled() {
            return Ok(Preallocation::Disabled);
        }

        if length == 0 {
            return Ok(Preallocation::Reserved);
        }

        match self.platform.allocate(file, offset, length) {
            Ok(()) => {
                trace!(offset, length, "reserved file region");
                Ok(Preallocation::Reserved)
            }
            Err(code) => match PreallocateError::from_platform_code(code, offset, length) {
                PreallocateError::Unsupported => {
                    warn!(
                        ?code,
                        "preallocation is not supported here, falling back to zero-fill"
                    );
                    self.enabled.store(false, Ordering::Release);
                    Ok(Preallocation::Disabled)
                }
                err => Err(err),
            },
        }
    }
}

/// Writes `length` zero bytes into `file` starting at `offset`.
///
/// This is the portable replacement for preallocation. A full disk shows up
/// here as an ordinary write error.
///
/// # Errors
///
/// Returns an error if seeking or writing fails.
pub fn zero_fill(file: &File, offset: u64, length: u64) -> io::Result<()> {
    let mut file = file;
    file.seek(SeekFrom::Start(offset))?;

    let zeros = [0u8; ZERO_FILL_CHUNK];
    let mut remaining = length;
    while remaining > 0 {
        let chunk = usize::try_from(remaining).map_or(ZERO_FILL_CHUNK, |r| r.min(ZERO_FILL_CHUNK));
        file.write_all(&zeros[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    #[derive(Debug, Default)]
    struct Scripted {
        codes: Mutex<VecDeque<Result<(), PlatformCode>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(codes: impl IntoIterator<Item = Result<(), PlatformCode>>) -> Arc<Self> {
            Arc::new(Self {
                codes: Mutex::new(codes.into_iter().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PlatformFs for Scripted {
        fn allocate(&self, _file: &File, _offset: u64, _len: u64) -> Result<(), PlatformCode> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.codes.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    fn temp_file() -> (tempfile::TempDir, File) {
        let dir = tempdir().unwrap();
        let file = File::create(dir.path().join("f.bin")).unwrap();
        (dir, file)
    }

    #[test]
    fn out_of_range_request_never_reaches_platform() {
        let (_dir, file) = temp_file();
        let platform = Scripted::new([]);
        let preallocator = PlatformPreallocator::with_platform(platform.clone());

        let result = preallocator.preallocate(&file, u64::MAX, 1);
        assert!(matches!(
            result,
            Err(PreallocateError::InvalidArgument { .. })
        ));
        let result = preallocator.preallocate(&file, 0, u64::MAX);
        assert!(matches!(
            result,
            Err(PreallocateError::InvalidArgument { .. })
        ));
        assert_eq!(platform.calls(), 0);
    }

    #[test]
    fn zero_length_is_success_without_call() {
        let (_dir, file) = temp_file();
        let platform = Scripted::new([]);
        let preallocator = PlatformPreallocator::with_platform(platform.clone());

        assert_eq!(
            preallocator.preallocate(&file, 10, 0).unwrap(),
            Preallocation::Reserved
        );
        assert_eq!(platform.calls(), 0);
    }

    #[test]
    fn interrupted_is_retryable_and_keeps_preallocator_enabled() {
        let (_dir, file) = temp_file();
        let platform = Scripted::new([Err(PlatformCode::Interrupted), Ok(())]);
        let preallocator = PlatformPreallocator::with_platform(platform.clone());

        let err = preallocator.preallocate(&file, 0, 4096).unwrap_err();
        assert!(err.is_retryable());
        assert!(preallocator.is_enabled());

        assert_eq!(
            preallocator.preallocate(&file, 0, 4096).unwrap(),
            Preallocation::Reserved
        );
        assert_eq!(platform.calls(), 2);
    }

    #[test]
    fn unsupported_disables_permanently() {
        let (_dir, file) = temp_file();
        let platform = Scripted::new([Err(PlatformCode::NotSupported)]);
        let preallocator = PlatformPreallocator::with_platform(platform.clone());

        assert_eq!(
            preallocator.preallocate(&file, 0, 4096).unwrap(),
            Preallocation::Disabled
        );
        assert!(!preallocator.is_enabled());

        for _ in 0..3 {
            assert_eq!(
                preallocator.preallocate(&file, 4096, 4096).unwrap(),
                Preallocation::Disabled
            );
        }
        assert_eq!(platform.calls(), 1);
    }

    #[test]
    fn out_of_space_and_fatal_codes() {
        let (_dir, file) = temp_file();
        let platform = Scripted::new([
            Err(PlatformCode::NoSpace),
            Err(PlatformCode::BadDescriptor),
            Err(PlatformCode::FileTooLarge),
        ]);
        let preallocator = PlatformPreallocator::with_platform(platform);

        assert!(preallocator
            .preallocate(&file, 0, 1)
            .unwrap_err()
            .is_out_of_space());
        assert!(matches!(
            preallocator.preallocate(&file, 0, 1),
            Err(PreallocateError::Io {
                code: PlatformCode::BadDescriptor
            })
        ));
        assert!(matches!(
            preallocator.preallocate(&file, 0, 1),
            Err(PreallocateError::Io {
                code: PlatformCode::FileTooLarge
            })
        ));
        assert!(preallocator.is_enabled());
    }

    #[test]
    fn disabled_preallocator_skips_platform() {
        let (_dir, file) = temp_file();
        let preallocator = PlatformPreallocator::disabled();
        assert_eq!(
            preallocator.preallocate(&file, 0, 1024).unwrap(),
            Preallocation::Disabled
        );
    }

    #[test]
    fn native_preallocation_reserves_region() {
        let (_dir, file) = temp_file();
        let preallocator = PlatformPreallocator::new();

        match preallocator.preallocate(&file, 0, 8192).unwrap() {
            Preallocation::Reserved => assert!(file.metadata().unwrap().len() >= 8192),
            Preallocation::Disabled => assert!(!preallocator.is_enabled()),
        }
    }

    #[test]
    fn zero_fill_writes_zeros() {
        let (_dir, file) = temp_file();
        zero_fill(&file, 100, 200_000).unwrap();
        assert_eq!(file.metadata().unwrap().len(), 200_100);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn requests_past_max_offset_are_rejected_locally(
                offset in 0u64..=u64::MAX,
                length in 0u64..=u64::MAX,
            ) {
                let (_dir, file) = temp_file();
                let platform = Scripted::new([]);
                let preallocator = PlatformPreallocator::with_platform(platform.clone());

                let representable = offset
                    .checked_add(length)
                    .is_some_and(|end| end <= i64::MAX as u64);
                let result = preallocator.preallocate(&file, offset, length);

                if representable {
                    prop_assert!(result.is_ok());
                } else {
                    let rejected = matches!(
                        result,
                        Err(PreallocateError::InvalidArgument { offset: o, length: l })
                            if o == offset && l == length
                    );
                    prop_assert!(rejected);
                    prop_assert_eq!(platform.calls(), 0);
                }
            }
        }
    }
}
