//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Reserving space for the storage failed.
    #[error("preallocation failed: {0}")]
    Preallocate(#[from] PreallocateError),

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Returns true if the failure was caused by the disk running out of space.
    #[must_use]
    pub fn is_out_of_space(&self) -> bool {
        match self {
            Self::Preallocate(e) => e.is_out_of_space(),
            Self::Io(e) => e.raw_os_error().map(PlatformCode::from_raw) == Some(PlatformCode::NoSpace),
            _ => false,
        }
    }
}

/// Raw result codes of the platform "reserve file region" call.
///
/// This is the fixed set of codes the platform call may produce. Codes are
/// translated into a [`PreallocateError`] exactly once, by the preallocator;
/// nothing above `seglog_storage` ever matches on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformCode {
    /// The file descriptor is not valid or not open for writing.
    BadDescriptor,
    /// `offset + len` exceeds the maximum file size.
    FileTooLarge,
    /// The call was interrupted by a signal.
    Interrupted,
    /// The platform rejected the arguments.
    InvalidArgument,
    /// The descriptor does not refer to a regular file.
    NoDevice,
    /// The descriptor refers to a pipe or FIFO.
    NotSeekable,
    /// There is not enough space left on the device.
    NoSpace,
    /// The filesystem or platform does not support preallocation.
    NotSupported,
    /// Any other platform code.
    Other(i32),
}

impl PlatformCode {
    /// Maps a raw OS error number to a platform code.
    #[cfg(unix)]
    #[must_use]
    pub fn from_raw(code: i32) -> Self {
        match code {
            libc::EBADF => Self::BadDescriptor,
            libc::EFBIG => Self::FileTooLarge,
            libc::EINTR => Self::Interrupted,
            libc::EINVAL => Self::InvalidArgument,
            libc::ENODEV => Self::NoDevice,
            libc::ESPIPE => Self::NotSeekable,
            libc::ENOSPC => Self::NoSpace,
            libc::EOPNOTSUPP | libc::ENOSYS => Self::NotSupported,
            other => Self::Other(other),
        }
    }

    /// Maps a raw OS error number to a platform code.
    #[cfg(windows)]
    #[must_use]
    pub fn from_raw(code: i32) -> Self {
        // ERROR_INVALID_HANDLE, ERROR_HANDLE_DISK_FULL, ERROR_NOT_SUPPORTED,
        // ERROR_DISK_FULL, ERROR_INVALID_PARAMETER, ERROR_FILE_TOO_LARGE
        match code {
            6 => Self::BadDescriptor,
            39 | 112 => Self::NoSpace,
            50 => Self::NotSupported,
            87 => Self::InvalidArgument,
            223 => Self::FileTooLarge,
            other => Self::Other(other),
        }
    }

    /// Maps a raw OS error number to a platform code.
    #[cfg(not(any(unix, windows)))]
    #[must_use]
    pub fn from_raw(code: i32) -> Self {
        Self::Other(code)
    }

    /// Maps an `io::Error` produced by the platform call to a platform code.
    #[must_use]
    pub fn from_io_error(err: &io::Error) -> Self {
        if let Some(code) = err.raw_os_error() {
            return Self::from_raw(code);
        }
        match err.kind() {
            io::ErrorKind::Interrupted => Self::Interrupted,
            io::ErrorKind::Unsupported => Self::NotSupported,
            io::ErrorKind::InvalidInput => Self::InvalidArgument,
            _ => Self::Other(-1),
        }
    }
}

/// Classified failure of a preallocation request.
///
/// Every variant is one failure class, so callers decide how to react by
/// matching on the variant alone.
#[derive(Debug, Error)]
pub enum PreallocateError {
    /// The request was malformed. Detected locally or rejected by the platform.
    #[error("invalid preallocation request: offset {offset}, length {length}")]
    InvalidArgument {
        /// Requested start offset.
        offset: u64,
        /// Requested length.
        length: u64,
    },

    /// The platform call was interrupted; retry the identical call.
    #[error("preallocation interrupted")]
    Interrupted,

    /// Preallocation is not available on this platform or filesystem.
    #[error("preallocation not supported")]
    Unsupported,

    /// The device has no room for the requested region.
    #[error("out of disk space while reserving {length} bytes at offset {offset}")]
    OutOfDiskSpace {
        /// Requested start offset.
        offset: u64,
        /// Requested length.
        length: u64,
    },

    /// Any other platform failure. Fatal for the file being reserved.
    #[error("preallocation I/O failure: {code:?}")]
    Io {
        /// The platform code that caused the failure.
        code: PlatformCode,
    },
}

impl PreallocateError {
    /// Classifies a platform code produced for the given request.
    #[must_use]
    pub fn from_platform_code(code: PlatformCode, offset: u64, length: u64) -> Self {
        match code {
            PlatformCode::Interrupted => Self::Interrupted,
            PlatformCode::NotSupported => Self::Unsupported,
            PlatformCode::NoSpace => Self::OutOfDiskSpace { offset, length },
            PlatformCode::InvalidArgument => Self::InvalidArgument { offset, length },
            code => Self::Io { code },
        }
    }

    /// Returns true if the identical call should simply be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Returns true if the device ran out of space.
    #[must_use]
    pub fn is_out_of_space(&self) -> bool {
        matches!(self, Self::OutOfDiskSpace { .. })
    }
}
