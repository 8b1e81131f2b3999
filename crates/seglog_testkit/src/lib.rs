//! # seglog testkit
//!
//! Test utilities for the seglog journal.
//!
//! This crate provides:
//! - Journal fixtures over temporary directories
//! - Crash simulation: torn writes, failing flushes and full disks
//! - A scripted preallocation platform for exercising error handling
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use seglog_testkit::prelude::*;
//!
//! let fixture = JournalFixture::new();
//! let mut journal = fixture.open_crashable();
//! fill(&mut journal, 3);
//! journal.flush().unwrap();
//! drop(journal);
//!
//! assert_eq!(fixture.recover().last_index(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod platform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::platform::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use platform::*;
