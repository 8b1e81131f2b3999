//! Journal records.

use crc32fast::Hasher;

/// ASQN value of a record that carries no application sequence number.
pub const ASQN_IGNORE: i64 = -1;

/// An immutable journal record.
///
/// The checksum covers the index, the ASQN and the payload, so a record
/// copied from another journal can be verified before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    index: u64,
    asqn: i64,
    checksum: u32,
    data: Vec<u8>,
}

impl JournalRecord {
    /// Creates a record and computes its checksum.
    #[must_use]
    pub fn new(index: u64, asqn: i64, data: Vec<u8>) -> Self {
        let checksum = compute_checksum(index, asqn, &data);
        Self {
            index,
            asqn,
            checksum,
            data,
        }
    }

    /// Assembles a record from its stored parts without verifying them.
    ///
    /// Use [`JournalRecord::verify_checksum`] before trusting the result.
    #[must_use]
    pub fn from_parts(index: u64, asqn: i64, checksum: u32, data: Vec<u8>) -> Self {
        Self {
            index,
            asqn,
            checksum,
            data,
        }
    }

    /// Returns the record's position in the log.
    #[must_use]
    pub const fn index(&self) -> u64 {
        self.index
    }

    /// Returns the ASQN, or [`ASQN_IGNORE`] if unset.
    #[must_use]
    pub const fn asqn(&self) -> i64 {
        self.asqn
    }

    /// Returns whether the record carries an ASQN.
    #[must_use]
    pub const fn has_asqn(&self) -> bool {
        self.asqn != ASQN_IGNORE
    }

    /// Returns the stored checksum.
    #[must_use]
    pub const fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Returns the opaque payload.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the record and returns its payload.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Recomputes the checksum over the record's contents.
    #[must_use]
    pub fn computed_checksum(&self) -> u32 {
        compute_checksum(self.index, self.asqn, &self.data)
    }

    /// Returns whether the stored checksum matches the contents.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.computed_checksum()
    }
}

/// Computes the CRC32 checksum of a record's index, ASQN and payload.
#[must_use]
pub fn compute_checksum(index: u64, asqn: i64, data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&index.to_le_bytes());
    hasher.update(&asqn.to_le_bytes());
    hasher.update(data);
    hasher.finalize()
}
