//! Error types for the journal.

use seglog_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur in journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The disk has no room for the record or its segment.
    #[error("storage full: {source}")]
    StorageFull {
        /// The out-of-space failure reported by storage.
        #[source]
        source: StorageError,
    },

    /// Flushing to stable storage failed.
    ///
    /// Records made durable by earlier successful flushes stay durable.
    #[error("flush failed: {source}")]
    Flush {
        /// The underlying storage failure.
        #[source]
        source: StorageError,
    },

    /// The requested record does not exist.
    #[error("no record at index {index}")]
    NoSuchRecord {
        /// The index that was requested.
        index: u64,
    },

    /// A record did not carry the next expected index.
    #[error("invalid record index: expected {expected}, got {actual}")]
    InvalidIndex {
        /// The index the journal expected.
        expected: u64,
        /// The index the record carried.
        actual: u64,
    },

    /// A record's checksum does not match its contents.
    #[error("checksum mismatch at index {index}: expected {expected:08x}, got {actual:08x}")]
    InvalidChecksum {
        /// Index of the offending record.
        index: u64,
        /// Checksum carried by the record.
        expected: u32,
        /// Checksum computed over the record contents.
        actual: u32,
    },

    /// A record's ASQN is lower than the last one written, or is negative.
    #[error("invalid ASQN {actual}: last written ASQN is {last}")]
    InvalidAsqn {
        /// The last ASQN written to the journal.
        last: i64,
        /// The ASQN that was rejected.
        actual: i64,
    },

    /// The record cannot fit in an empty segment.
    #[error("record of {size} bytes exceeds the maximum of {max} bytes")]
    RecordTooLarge {
        /// Framed size of the record.
        size: u64,
        /// Largest frame a segment can hold.
        max: u64,
    },

    /// Durable data is missing or damaged; the journal cannot be opened.
    #[error("journal corrupted: {message}")]
    CorruptedJournal {
        /// Description of the corruption.
        message: String,
    },

    /// A segment file is damaged or not a segment.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// The configuration is unusable.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Another process holds the journal directory.
    #[error("journal locked: another process has exclusive access")]
    JournalLocked,

    /// The journal or reader is closed.
    #[error("journal is closed")]
    Closed,
}

impl From<StorageError> for JournalError {
    fn from(err: StorageError) -> Self {
        if err.is_out_of_space() {
            Self::StorageFull { source: err }
        } else {
            Self::Storage(err)
        }
    }
}

impl JournalError {
    /// Creates a journal corruption error.
    pub fn corrupted_journal(message: impl Into<String>) -> Self {
        Self::CorruptedJournal {
            message: message.into(),
        }
    }

    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wraps a failed flush.
    pub fn flush(source: impl Into<StorageError>) -> Self {
        Self::Flush {
            source: source.into(),
        }
    }

    /// Returns true if the journal instance must be discarded and reopened
    /// from disk after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Storage(_)
                | Self::Io(_)
                | Self::StorageFull { .. }
                | Self::CorruptedJournal { .. }
                | Self::SegmentCorruption { .. }
        )
    }
}
