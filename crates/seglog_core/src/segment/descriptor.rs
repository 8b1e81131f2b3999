//! Segment descriptor.

use crate::error::{JournalError, JournalResult};

/// Magic bytes identifying a segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"SGLJ";

/// Current descriptor format version.
pub const DESCRIPTOR_VERSION: u8 = 1;

/// Size of the encoded descriptor at the start of every segment.
pub const DESCRIPTOR_SIZE: usize = 32;

/// Fixed-size header of a segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Segment ID (monotonically increasing).
    pub id: u64,
    /// Format version the segment was written with.
    pub version: u8,
    /// Index of the first record the segment holds.
    pub first_index: u64,
    /// Maximum size of the segment file in bytes.
    pub max_segment_size: u32,
}

impl SegmentDescriptor {
    /// Creates a descriptor for a new segment.
    #[must_use]
    pub const fn new(id: u64, first_index: u64, max_segment_size: u32) -> Self {
        Self {
            id,
            version: DESCRIPTOR_VERSION,
            first_index,
            max_segment_size,
        }
    }

    /// Encodes the descriptor to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        buf[4] = self.version;
        // 5..8 reserved
        buf[8..16].copy_from_slice(&self.id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.first_index.to_le_bytes());
        buf[24..28].copy_from_slice(&self.max_segment_size.to_le_bytes());
        let crc = crc32fast::hash(&buf[..28]);
        buf[28..32].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a descriptor from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::SegmentCorruption`] if the bytes are too short,
    /// carry the wrong magic or checksum, or a newer version.
    pub fn decode(data: &[u8]) -> JournalResult<Self> {
        if data.len() < DESCRIPTOR_SIZE {
            return Err(JournalError::segment_corruption(format!(
                "descriptor needs {DESCRIPTOR_SIZE} bytes, got {}",
                data.len()
            )));
        }

        if data[0..4] != SEGMENT_MAGIC {
            return Err(JournalError::segment_corruption("invalid segment magic"));
        }

        let stored_crc = u32::from_le_bytes([data[28], data[29], data[30], data[31]]);
        let computed_crc = crc32fast::hash(&data[..28]);
        if stored_crc != computed_crc {
            return Err(JournalError::segment_corruption(format!(
                "descriptor checksum mismatch: expected {stored_crc:08x}, got {computed_crc:08x}"
            )));
        }

        let version = data[4];
        if version > DESCRIPTOR_VERSION {
            return Err(JournalError::segment_corruption(format!(
                "unsupported segment version {version}"
            )));
        }

        let id = u64::from_le_bytes(read_array(&data[8..16]));
        let first_index = u64::from_le_bytes(read_array(&data[16..24]));
        let max_segment_size = u32::from_le_bytes(read_array(&data[24..28]));

        Ok(Self {
            id,
            version,
            first_index,
            max_segment_size,
        })
    }
}

/// Copies a slice of known length into an array.
pub(crate) fn read_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&slice[..N]);
    out
}
