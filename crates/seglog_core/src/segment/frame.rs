//! Record framing inside a segment.

use crate::record::JournalRecord;
use crate::segment::descriptor::read_array;

/// Size of a frame header.
/// length (4) + index (8) + asqn (8) + checksum (4) = 24 bytes
pub const FRAME_HEADER_SIZE: usize = 24;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    /// Payload length in bytes.
    pub length: u32,
    /// Record index.
    pub index: u64,
    /// Record ASQN.
    pub asqn: i64,
    /// Record checksum.
    pub checksum: u32,
}

impl FrameHeader {
    /// Decodes a header from exactly [`FRAME_HEADER_SIZE`] bytes.
    pub fn decode(data: &[u8]) -> Self {
        Self {
            length: u32::from_le_bytes(read_array(&data[0..4])),
            index: u64::from_le_bytes(read_array(&data[4..12])),
            asqn: i64::from_le_bytes(read_array(&data[12..20])),
            checksum: u32::from_le_bytes(read_array(&data[20..24])),
        }
    }

    /// Returns the size of the whole frame, header included.
    pub fn frame_len(&self) -> u64 {
        FRAME_HEADER_SIZE as u64 + u64::from(self.length)
    }
}

/// Returns the framed size of a payload.
pub(crate) fn frame_len(payload_len: usize) -> u64 {
    (FRAME_HEADER_SIZE + payload_len) as u64
}

/// Encodes a record as a frame.
pub(crate) fn encode(record: &JournalRecord) -> Vec<u8> {
    let data = record.data();
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + data.len());

    // Length (payload length)
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());

    buf.extend_from_slice(&record.index().to_le_bytes());
    buf.extend_from_slice(&record.asqn().to_le_bytes());
    buf.extend_from_slice(&record.checksum().to_le_bytes());
    buf.extend_from_slice(data);

    buf
}
