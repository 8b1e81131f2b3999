//! Segment files.
//!
//! A journal is a sequence of segment files, each holding a contiguous run of
//! records. Every segment starts with a fixed-size descriptor followed by
//! frames, one per record:
//!
//! ```text
//! | magic (4) | version (1) | reserved (3) | id (8) | first_index (8) | max_size (4) | crc32 (4) |
//! | length (4) | index (8) | asqn (8) | checksum (4) | payload (length) |
//! | ...                                                                |
//! ```
//!
//! Space after the last frame is either zeroed or not yet written. A scan
//! stops at the first frame that is not the next record with a matching
//! checksum.

mod descriptor;
mod factory;
mod file;
mod frame;

pub use descriptor::{SegmentDescriptor, DESCRIPTOR_SIZE, DESCRIPTOR_VERSION, SEGMENT_MAGIC};
pub use factory::{FileSegmentFactory, SegmentFactory};
pub use file::{ScanEnd, Segment};
pub use frame::FRAME_HEADER_SIZE;
pub(crate) use frame::frame_len;
