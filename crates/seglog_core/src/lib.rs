//! # seglog core
//!
//! A segmented, append-only journal for consensus logs.
//!
//! This crate provides:
//! - [`Journal`]: appends records, rolls over segment files, flushes,
//!   truncates the tail and compacts the head
//! - [`JournalReader`]: forward cursor with seek by index and by ASQN
//! - [`SparseJournalIndex`]: sampled index bounding the scan for a record
//! - Crash recovery on open, with torn tails cut off
//!
//! ## Durability
//!
//! Appended records are visible to readers at once and durable after
//! [`Journal::flush`] returns. Records appended after the last successful
//! flush may be lost in a crash; records flushed before it never are.
//!
//! ## Example
//!
//! ```rust,no_run
//! use seglog_core::{Journal, JournalConfig};
//!
//! let config = JournalConfig::new("data/raft").name("partition-1");
//! let mut journal = Journal::open(config)?;
//!
//! journal.append(1, b"first".to_vec())?;
//! journal.append(2, b"second".to_vec())?;
//! journal.flush()?;
//!
//! let mut reader = journal.open_reader();
//! reader.seek_to_asqn(1)?;
//! for record in reader.records() {
//!     let record = record?;
//!     println!("{} -> {:?}", record.index(), record.data());
//! }
//! # Ok::<(), seglog_core::JournalError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
mod index;
mod journal;
mod meta;
mod reader;
mod record;
pub mod segment;

pub use config::JournalConfig;
pub use error::{JournalError, JournalResult};
pub use index::{IndexEntry, SparseJournalIndex};
pub use journal::Journal;
pub use reader::{JournalReader, Records};
pub use record::{compute_checksum, JournalRecord, ASQN_IGNORE};
pub use segment::{FileSegmentFactory, SegmentFactory};
