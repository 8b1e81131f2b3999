//! Sparse index from record index to byte position.
//!
//! Only every `density`-th record passed to [`SparseJournalIndex::index`] is
//! kept. A lookup returns the closest sampled record at or before the target,
//! and the caller scans forward from there. Memory stays proportional to
//! `records / density`.
//!
//! Records that carry an ASQN are sampled into a second map on the same
//! cadence so readers can find a starting point for ASQN seeks.

use crate::record::JournalRecord;
use std::collections::BTreeMap;

/// A sampled `(index, position)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Record index.
    pub index: u64,
    /// Byte offset of the record's frame within its segment.
    pub position: u64,
}

/// Sampled map from record index to frame position.
#[derive(Debug, Clone)]
pub struct SparseJournalIndex {
    density: usize,
    /// Calls to `index` since the last sample.
    calls: usize,
    positions: BTreeMap<u64, u64>,
    /// ASQN of sampled records that carried one, mapped to their index.
    asqns: BTreeMap<i64, u64>,
}

impl SparseJournalIndex {
    /// Creates an empty index sampling every `density`-th call.
    ///
    /// A density of zero is treated as one.
    #[must_use]
    pub fn new(density: usize) -> Self {
        Self {
            density: density.max(1),
            calls: 0,
            positions: BTreeMap::new(),
            asqns: BTreeMap::new(),
        }
    }

    /// Returns the sampling density.
    #[must_use]
    pub const fn density(&self) -> usize {
        self.density
    }

    /// Feeds a record written at `position`.
    ///
    /// The record is stored if this is the `density`-th call since the last
    /// stored record. Only the call count matters, not the index value.
    pub fn index(&mut self, record: &JournalRecord, position: u64) {
        self.calls += 1;
        if self.calls < self.density {
            return;
        }
        self.calls = 0;

        self.positions.insert(record.index(), position);
        if record.has_asqn() {
            self.asqns.insert(record.asqn(), record.index());
        }
    }

    /// Returns the stored entry with the largest index `<= index`.
    #[must_use]
    pub fn lookup(&self, index: u64) -> Option<IndexEntry> {
        self.positions
            .range(..=index)
            .next_back()
            .map(|(&index, &position)| IndexEntry { index, position })
    }

    /// Returns the index of the sampled record with the largest ASQN `<= asqn`
    /// whose index does not exceed `upper_bound`.
    #[must_use]
    pub fn lookup_asqn(&self, asqn: i64, upper_bound: u64) -> Option<u64> {
        self.asqns
            .range(..=asqn)
            .rev()
            .map(|(_, &index)| index)
            .find(|&index| index <= upper_bound)
    }

    /// Removes every entry with an index greater than `index`.
    pub fn truncate(&mut self, index: u64) {
        let _ = self.positions.split_off(&(index.saturating_add(1)));
        self.asqns.retain(|_, stored| *stored <= index);
    }

    /// Removes every entry below the floor entry of `index`.
    ///
    /// The floor entry itself is kept so lookups for records between it and
    /// the next stored entry still find a starting point.
    pub fn compact(&mut self, index: u64) {
        let Some(floor) = self.lookup(index) else {
            return;
        };
        self.positions = self.positions.split_off(&floor.index);
        self.asqns.retain(|_, stored| *stored >= floor.index);
    }

    /// Removes all entries and restarts the sampling cadence.
    pub fn clear(&mut self) {
        self.calls = 0;
        self.positions.clear();
        self.asqns.clear();
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns whether no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
