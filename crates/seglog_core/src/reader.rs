//! Seekable cursor over a journal.

use crate::error::{JournalError, JournalResult};
use crate::journal::SharedState;
use crate::record::JournalRecord;
use crate::segment::Segment;
use std::sync::Arc;
use tracing::trace;

/// Where the next record's frame starts, once known.
#[derive(Debug)]
struct Cursor {
    segment: Arc<Segment>,
    position: u64,
    index: u64,
}

/// A forward cursor over a journal's records.
///
/// A reader starts before the first record. Seeks never fail for
/// out-of-range targets; they clamp to the journal's bounds, so callers
/// re-check [`JournalReader::has_next`] after seeking.
///
/// Readers only change their own position. After a truncation or compaction
/// the caller should seek again; records removed underneath a reader are not
/// guaranteed to be readable.
///
/// A reader is not shared between threads, but any number of readers may
/// run alongside the journal's writer.
#[derive(Debug)]
pub struct JournalReader {
    shared: Arc<SharedState>,
    /// Index of the next record, or `None` to follow the journal's first index.
    next_index: Option<u64>,
    cursor: Option<Cursor>,
    closed: bool,
}

impl JournalReader {
    pub(crate) fn new(shared: Arc<SharedState>) -> Self {
        Self {
            shared,
            next_index: None,
            cursor: None,
            closed: false,
        }
    }

    /// Returns the index of the record the next call to `next` returns.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        let first = self.shared.first_index();
        self.next_index.map_or(first, |index| index.max(first))
    }

    /// Positions the reader so that `next` returns record `index`.
    ///
    /// Targets below the first record clamp to the first record; targets past
    /// the last record clamp to `last_index + 1`. Returns the resulting next
    /// index.
    pub fn seek(&mut self, index: u64) -> u64 {
        let first = self.shared.first_index();
        let last = self.shared.last_index();
        let target = index.clamp(first, last.saturating_add(1).max(first));

        self.next_index = Some(target);
        self.cursor = None;
        trace!(index, target, "reader seek");
        target
    }

    /// Positions the reader at the first record.
    pub fn seek_to_first(&mut self) -> u64 {
        let first = self.shared.first_index();
        self.seek(first)
    }

    /// Positions the reader at the last record.
    ///
    /// On an empty journal this is the same as [`JournalReader::seek_to_first`].
    pub fn seek_to_last(&mut self) -> u64 {
        let last = self.shared.last_index();
        self.seek(last)
    }

    /// Positions the reader at the last record whose ASQN is `<= asqn`.
    ///
    /// Records without an ASQN are skipped over. If no record qualifies, the
    /// reader is positioned at the first record, whose ASQN may be unset.
    ///
    /// # Errors
    ///
    /// Returns an error if records cannot be read while scanning.
    pub fn seek_to_asqn(&mut self, asqn: i64) -> JournalResult<u64> {
        self.seek_to_asqn_with_upper_bound(asqn, u64::MAX)
    }

    /// Like [`JournalReader::seek_to_asqn`], considering only records with an
    /// index `<= upper_bound`.
    ///
    /// # Errors
    ///
    /// Returns an error if records cannot be read while scanning.
    pub fn seek_to_asqn_with_upper_bound(
        &mut self,
        asqn: i64,
        upper_bound: u64,
    ) -> JournalResult<u64> {
        self.ensure_open()?;

        let first = self.shared.first_index();
        let last = self.shared.last_index().min(upper_bound);
        if last < first {
            return Ok(self.seek_to_first());
        }

        let start = self
            .shared
            .index
            .read()
            .lookup_asqn(asqn, last)
            .map_or(first, |index| index.max(first));

        self.seek(start);
        let mut found = None;
        while self.next_index() <= last {
            let record = self.next()?;
            if record.has_asqn() {
                if record.asqn() > asqn {
                    break;
                }
                found = Some(record.index());
            }
        }

        let target = match found {
            Some(index) => self.seek(index),
            None => self.seek_to_first(),
        };
        trace!(asqn, upper_bound, start, target, "reader asqn seek");
        Ok(target)
    }

    /// Returns whether `next` would return a record.
    #[must_use]
    pub fn has_next(&self) -> bool {
        !self.closed && !self.shared.is_closed() && self.next_index() <= self.shared.last_index()
    }

    /// Returns the next record and advances past it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - There is no next record (`NoSuchRecord`)
    /// - The reader or journal is closed (`Closed`)
    /// - The record cannot be read
    pub fn next(&mut self) -> JournalResult<JournalRecord> {
        self.ensure_open()?;

        let index = self.next_index();
        if index > self.shared.last_index() {
            return Err(JournalError::NoSuchRecord { index });
        }

        let record = self.read(index)?;
        self.next_index = Some(index + 1);
        Ok(record)
    }

    /// Returns an iterator over the remaining records.
    pub fn records(&mut self) -> Records<'_> {
        Records { reader: self }
    }

    /// Releases the reader's segment handles. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.closed = true;
        self.cursor = None;
    }

    /// Returns whether the reader has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> JournalResult<()> {
        if self.closed || self.shared.is_closed() {
            return Err(JournalError::Closed);
        }
        Ok(())
    }

    fn read(&mut self, index: u64) -> JournalResult<JournalRecord> {
        if let Some(cursor) = self.cursor.take() {
            if cursor.index == index {
                if let Some((record, next)) = cursor.segment.read(cursor.position, index)? {
                    self.cursor = Some(Cursor {
                        segment: cursor.segment,
                        position: next,
                        index: index + 1,
                    });
                    return Ok(record);
                }
            }
        }

        let segment = self
            .shared
            .segment_for(index)
            .ok_or(JournalError::NoSuchRecord { index })?;
        let hint = self.shared.index.read().lookup(index);
        let position = segment
            .position_of(index, hint)?
            .ok_or(JournalError::NoSuchRecord { index })?;
        let (record, next) = segment.read(position, index)?.ok_or_else(|| {
            JournalError::segment_corruption(format!(
                "record {index} unreadable at offset {position} of segment {}",
                segment.id()
            ))
        })?;

        self.cursor = Some(Cursor {
            segment,
            position: next,
            index: index + 1,
        });
        Ok(record)
    }
}

/// Iterator over a reader's remaining records.
///
/// Created by [`JournalReader::records`]. Stops once no record follows,
/// after yielding any read error.
#[derive(Debug)]
pub struct Records<'a> {
    reader: &'a mut JournalReader,
}

impl Iterator for Records<'_> {
    type Item = JournalResult<JournalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.reader.has_next() {
            return None;
        }
        Some(self.reader.next())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::JournalConfig;
    use crate::error::JournalError;
    use crate::journal::Journal;
    use crate::record::ASQN_IGNORE;
    use tempfile::{tempdir, TempDir};

    fn open(dir: &TempDir) -> Journal {
        Journal::open(
            JournalConfig::new(dir.path())
                .max_segment_size(256)
                .index_density(3),
        )
        .unwrap()
    }

    fn with_records(dir: &TempDir, n: u64) -> Journal {
        let mut journal = open(dir);
        for i in 1..=n {
            journal.append(ASQN_IGNORE, i.to_le_bytes().to_vec()).unwrap();
        }
        journal
    }

    #[test]
    fn reads_in_order_across_segments() {
        let dir = tempdir().unwrap();
        let journal = with_records(&dir, 20);
        assert!(journal.segment_count() > 1);

        let mut reader = journal.open_reader();
        assert_eq!(reader.next_index(), 1);
        let indices: Vec<u64> = reader.records().map(|r| r.unwrap().index()).collect();
        assert_eq!(indices, (1..=20).collect::<Vec<_>>());
        assert!(!reader.has_next());
        assert!(matches!(
            reader.next(),
            Err(JournalError::NoSuchRecord { index: 21 })
        ));
    }

    #[test]
    fn seek_clamps() {
        let dir = tempdir().unwrap();
        let mut journal = with_records(&dir, 10);
        journal.compact(1).unwrap();
        let mut reader = journal.open_reader();

        assert_eq!(reader.seek(0), 1);
        assert_eq!(reader.seek(7), 7);
        assert_eq!(reader.next().unwrap().data(), 7u64.to_le_bytes());

        assert_eq!(reader.seek(100), 11);
        assert!(!reader.has_next());

        assert_eq!(reader.seek_to_last(), 10);
        assert_eq!(reader.next().unwrap().index(), 10);
        assert_eq!(reader.seek_to_first(), 1);
        assert_eq!(reader.next().unwrap().index(), 1);
    }

    #[test]
    fn seek_on_empty_journal() {
        let dir = tempdir().unwrap();
        let journal = open(&dir);
        let mut reader = journal.open_reader();

        assert_eq!(reader.seek(5), 1);
        assert_eq!(reader.seek_to_first(), 1);
        assert_eq!(reader.seek_to_last(), 1);
        assert!(!reader.has_next());
        assert_eq!(reader.seek_to_asqn(10).unwrap(), 1);
    }

    #[test]
    fn sees_records_appended_later() {
        let dir = tempdir().unwrap();
        let mut journal = with_records(&dir, 2);
        let mut reader = journal.open_reader();

        assert_eq!(reader.records().count(), 2);
        journal.append(ASQN_IGNORE, b"late".to_vec()).unwrap();
        assert!(reader.has_next());
        assert_eq!(reader.next().unwrap().data(), b"late");
    }

    #[test]
    fn seek_to_asqn() {
        let dir = tempdir().unwrap();
        let mut journal = open(&dir);
        // index:  1   2   3   4   5   6   7   8
        // asqn:   -   10  -   20  20  -   30  -
        for asqn in [ASQN_IGNORE, 10, ASQN_IGNORE, 20, 20, ASQN_IGNORE, 30, ASQN_IGNORE] {
            journal.append(asqn, b"x".to_vec()).unwrap();
        }
        let mut reader = journal.open_reader();

        assert_eq!(reader.seek_to_asqn(5).unwrap(), 1);
        assert_eq!(reader.seek_to_asqn(10).unwrap(), 2);
        assert_eq!(reader.seek_to_asqn(15).unwrap(), 2);
        assert_eq!(reader.seek_to_asqn(20).unwrap(), 5);
        assert_eq!(reader.seek_to_asqn(1000).unwrap(), 7);
        assert_eq!(reader.next().unwrap().asqn(), 30);

        assert_eq!(reader.seek_to_asqn_with_upper_bound(1000, 6).unwrap(), 5);
        assert_eq!(reader.seek_to_asqn_with_upper_bound(1000, 1).unwrap(), 1);
    }

    #[test]
    fn close_is_idempotent_and_local() {
        let dir = tempdir().unwrap();
        let mut journal = with_records(&dir, 3);
        let mut reader = journal.open_reader();
        let mut other = journal.open_reader();

        reader.close();
        reader.close();
        assert!(reader.is_closed());
        assert!(!reader.has_next());
        assert!(matches!(reader.next(), Err(JournalError::Closed)));

        assert_eq!(other.next().unwrap().index(), 1);
        journal.append(ASQN_IGNORE, b"4".to_vec()).unwrap();
    }

    #[test]
    fn reader_on_other_thread() {
        let dir = tempdir().unwrap();
        let mut journal = with_records(&dir, 50);
        let mut reader = journal.open_reader();

        let handle = std::thread::spawn(move || {
            let mut seen = 0;
            while seen < 100 {
                if reader.has_next() {
                    reader.next().unwrap();
                    seen += 1;
                }
            }
            seen
        });
        for _ in 0..50 {
            journal.append(ASQN_IGNORE, b"more".to_vec()).unwrap();
        }
        assert_eq!(handle.join().unwrap(), 100);
    }
}
