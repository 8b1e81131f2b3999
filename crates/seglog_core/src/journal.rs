//! The segmented journal.

use crate::config::JournalConfig;
use crate::dir::JournalDir;
use crate::error::{JournalError, JournalResult};
use crate::index::SparseJournalIndex;
use crate::meta::MetaStore;
use crate::reader::JournalReader;
use crate::record::{JournalRecord, ASQN_IGNORE};
use crate::segment::{
    frame_len, FileSegmentFactory, ScanEnd, Segment, SegmentDescriptor, SegmentFactory,
    DESCRIPTOR_SIZE,
};
use parking_lot::RwLock;
use seglog_storage::PlatformPreallocator;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// State shared between the journal and its readers.
///
/// Only the journal mutates it. Segments are keyed by their first index.
#[derive(Debug)]
pub(crate) struct SharedState {
    pub(crate) segments: RwLock<BTreeMap<u64, Arc<Segment>>>,
    pub(crate) index: RwLock<SparseJournalIndex>,
    first_index: AtomicU64,
    last_index: AtomicU64,
    closed: AtomicBool,
}

impl SharedState {
    pub(crate) fn first_index(&self) -> u64 {
        self.first_index.load(Ordering::Acquire)
    }

    pub(crate) fn last_index(&self) -> u64 {
        self.last_index.load(Ordering::Acquire)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the segment holding record `index`.
    pub(crate) fn segment_for(&self, index: u64) -> Option<Arc<Segment>> {
        self.segments
            .read()
            .range(..=index)
            .next_back()
            .map(|(_, segment)| Arc::clone(segment))
            .filter(|segment| segment.contains(index))
    }
}

/// A segmented, append-only log of records.
///
/// Records get consecutive indices starting at the journal's first index.
/// Appended records are immediately visible to readers; they are durable
/// once [`Journal::flush`] returns.
///
/// The journal is the single writer: every mutating method takes `&mut self`.
/// Any number of [`JournalReader`]s may read concurrently, from any thread.
///
/// # Example
///
/// ```rust,no_run
/// use seglog_core::{Journal, JournalConfig, ASQN_IGNORE};
///
/// let mut journal = Journal::open(JournalConfig::new("raft-log"))?;
/// let record = journal.append(ASQN_IGNORE, b"entry".to_vec())?;
/// journal.flush()?;
///
/// let mut reader = journal.open_reader();
/// reader.seek(record.index());
/// assert_eq!(reader.next()?.data(), b"entry");
/// # Ok::<(), seglog_core::JournalError>(())
/// ```
#[derive(Debug)]
pub struct Journal {
    config: JournalConfig,
    /// Journal directory (holds the lock).
    dir: JournalDir,
    meta: MetaStore,
    factory: Arc<dyn SegmentFactory>,
    preallocator: Arc<PlatformPreallocator>,
    shared: Arc<SharedState>,
    /// Last ASQN written, or `ASQN_IGNORE`.
    last_asqn: i64,
    last_flushed: u64,
    closed: bool,
}

impl Journal {
    /// Opens the journal described by `config`, creating it if needed.
    ///
    /// Segment files are opened as plain files and preallocated through the
    /// platform's native call.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid (`InvalidConfig`)
    /// - Another process holds the journal (`JournalLocked`)
    /// - Flushed records are missing or damaged (`CorruptedJournal`)
    /// - I/O errors occur
    pub fn open(config: JournalConfig) -> JournalResult<Self> {
        Self::open_with(
            config,
            Arc::new(FileSegmentFactory),
            Arc::new(PlatformPreallocator::new()),
        )
    }

    /// Opens the journal with a custom segment factory and preallocator.
    ///
    /// # Errors
    ///
    /// Same as [`Journal::open`].
    pub fn open_with(
        config: JournalConfig,
        factory: Arc<dyn SegmentFactory>,
        preallocator: Arc<PlatformPreallocator>,
    ) -> JournalResult<Self> {
        config.validate()?;

        let dir = JournalDir::open(&config.directory, &config.name)?;
        let mut meta = MetaStore::open(&dir.meta_path())?;
        let last_flushed = meta.load()?;
        debug!(path = %meta.path().display(), last_flushed, "loaded journal meta");

        let shared = Arc::new(SharedState {
            segments: RwLock::new(BTreeMap::new()),
            index: RwLock::new(SparseJournalIndex::new(config.index_density)),
            first_index: AtomicU64::new(config.first_index),
            last_index: AtomicU64::new(config.first_index - 1),
            closed: AtomicBool::new(false),
        });

        let mut journal = Self {
            config,
            dir,
            meta,
            factory,
            preallocator,
            shared,
            last_asqn: ASQN_IGNORE,
            last_flushed,
            closed: false,
        };
        journal.recover()?;

        info!(
            directory = %journal.dir.path().display(),
            name = journal.dir.name(),
            segments = journal.segment_count(),
            first_index = journal.first_index(),
            last_index = journal.last_index(),
            last_flushed = journal.last_flushed,
            "opened journal"
        );
        Ok(journal)
    }

    /// Loads every segment on disk and prepares the last one for appends.
    fn recover(&mut self) -> JournalResult<()> {
        let mut files = self.dir.list_segments()?;
        self.discard_unfinished_segment(&mut files)?;

        let mut loaded: Vec<Arc<Segment>> = Vec::with_capacity(files.len());
        let mut remaining = files.into_iter();
        {
            let mut index = self.shared.index.write();
            for (id, path) in remaining.by_ref() {
                let backend = self.factory.open(&path)?;
                let (segment, end) = Segment::open(&path, backend, &mut index)?;

                if segment.id() != id {
                    return Err(JournalError::corrupted_journal(format!(
                        "{} holds segment {}",
                        path.display(),
                        segment.id()
                    )));
                }

                if let Some(previous) = loaded.last() {
                    let expected = previous.last_index() + 1;
                    if segment.first_index() != expected {
                        // Records lost after the last flush leave a gap that
                        // later, also unflushed, segments cannot bridge.
                        if expected <= self.last_flushed || segment.first_index() < expected {
                            return Err(JournalError::corrupted_journal(format!(
                                "segment {} starts at index {} but {} was expected",
                                segment.id(),
                                segment.first_index(),
                                expected
                            )));
                        }
                        warn!(
                            segment = segment.id(),
                            index = expected,
                            "discarding segments after unflushed gap"
                        );
                        drop(segment);
                        self.remove_file(&path)?;
                        break;
                    }
                }

                let torn = end == ScanEnd::Torn;
                let torn_index = segment.last_index() + 1;
                loaded.push(Arc::new(segment));

                if torn {
                    if torn_index <= self.last_flushed {
                        return Err(JournalError::corrupted_journal(format!(
                            "record {torn_index} in segment {id} is damaged but was flushed"
                        )));
                    }
                    warn!(segment = id, index = torn_index, "discarding torn tail");
                    break;
                }
            }
        }

        // Anything after a torn tail or a gap was never flushed.
        for (id, path) in remaining {
            debug!(segment = id, "discarding segment after torn tail");
            self.remove_file(&path)?;
        }
        self.dir.sync()?;

        let Some(last) = loaded.last().cloned() else {
            if self.last_flushed > 0 {
                return Err(JournalError::corrupted_journal(format!(
                    "no segments found but records up to {} were flushed",
                    self.last_flushed
                )));
            }
            self.create_segment(1, self.config.first_index)?;
            return Ok(());
        };

        if last.last_index() < self.last_flushed {
            return Err(JournalError::corrupted_journal(format!(
                "journal ends at index {} but records up to {} were flushed",
                last.last_index(),
                self.last_flushed
            )));
        }

        last.recover(self.preallocation())?;
        self.shared.index.write().truncate(last.last_index());

        let first_index = loaded.first().map_or(self.config.first_index, |s| s.first_index());
        self.shared.first_index.store(first_index, Ordering::Release);
        self.shared.last_index.store(last.last_index(), Ordering::Release);
        self.last_asqn = loaded
            .iter()
            .rev()
            .map(|segment| segment.last_asqn())
            .find(|&asqn| asqn != ASQN_IGNORE)
            .unwrap_or(ASQN_IGNORE);

        let mut segments = self.shared.segments.write();
        for segment in loaded {
            segments.insert(segment.first_index(), segment);
        }
        Ok(())
    }

    /// Deletes a last segment file whose creation never completed.
    fn discard_unfinished_segment(&self, files: &mut Vec<(u64, PathBuf)>) -> JournalResult<()> {
        let Some((id, path)) = files.last() else {
            return Ok(());
        };

        let backend = self.factory.open(path)?;
        let capacity = backend.capacity()?;
        let unfinished = capacity < DESCRIPTOR_SIZE as u64
            || backend.read_at(0, DESCRIPTOR_SIZE)?.iter().all(|&b| b == 0);
        drop(backend);

        if unfinished {
            warn!(segment = *id, "removing segment file with no descriptor");
            self.remove_file(path)?;
            files.pop();
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> JournalResult<()> {
        self.factory.remove(path)?;
        Ok(())
    }

    /// Returns the configuration the journal was opened with.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Returns the index of the first record.
    #[must_use]
    pub fn first_index(&self) -> u64 {
        self.shared.first_index()
    }

    /// Returns the index of the last record, or `first_index() - 1` if the
    /// journal is empty.
    #[must_use]
    pub fn last_index(&self) -> u64 {
        self.shared.last_index()
    }

    /// Returns whether the journal holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_index() < self.first_index()
    }

    /// Returns the index the next appended record will get.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.last_index() + 1
    }

    /// Returns the index up to which records are known to be durable.
    #[must_use]
    pub fn last_flushed_index(&self) -> u64 {
        self.last_flushed
    }

    /// Returns the number of segment files.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.shared.segments.read().len()
    }

    /// Returns whether the journal has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Appends a record with the given ASQN and payload.
    ///
    /// Pass [`ASQN_IGNORE`] for records without an ASQN. The record is visible
    /// to readers on return and durable after the next [`Journal::flush`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The ASQN is below the last one written (`InvalidAsqn`)
    /// - The record cannot fit in a segment (`RecordTooLarge`)
    /// - Space for a new segment cannot be reserved (`StorageFull`)
    /// - The write fails
    /// - The journal is closed
    pub fn append(&mut self, asqn: i64, data: impl Into<Vec<u8>>) -> JournalResult<JournalRecord> {
        self.ensure_open()?;
        self.check_asqn(asqn)?;

        let record = JournalRecord::new(self.next_index(), asqn, data.into());
        self.write(&record)?;
        Ok(record)
    }

    /// Appends a record built elsewhere, such as one replicated from a leader.
    ///
    /// The record is stored byte for byte, checksum included.
    ///
    /// # Errors
    ///
    /// Same as [`Journal::append`], plus:
    /// - The record's index is not the next index (`InvalidIndex`)
    /// - The record's checksum does not match its contents (`InvalidChecksum`)
    pub fn append_record(&mut self, record: &JournalRecord) -> JournalResult<()> {
        self.ensure_open()?;

        let expected = self.next_index();
        if record.index() != expected {
            return Err(JournalError::InvalidIndex {
                expected,
                actual: record.index(),
            });
        }
        let actual = record.computed_checksum();
        if actual != record.checksum() {
            return Err(JournalError::InvalidChecksum {
                index: record.index(),
                expected: record.checksum(),
                actual,
            });
        }
        self.check_asqn(record.asqn())?;

        self.write(record)
    }

    fn check_asqn(&self, asqn: i64) -> JournalResult<()> {
        if asqn < ASQN_IGNORE || (asqn != ASQN_IGNORE && asqn < self.last_asqn) {
            return Err(JournalError::InvalidAsqn {
                last: self.last_asqn,
                actual: asqn,
            });
        }
        Ok(())
    }

    fn write(&mut self, record: &JournalRecord) -> JournalResult<()> {
        let size = frame_len(record.data().len());
        let segment = self.segment_with_room(size)?;

        let position = segment.append(record)?;
        self.shared.index.write().index(record, position);
        if record.has_asqn() {
            self.last_asqn = record.asqn();
        }
        self.shared.last_index.store(record.index(), Ordering::Release);

        trace!(index = record.index(), segment = segment.id(), position, "appended record");
        Ok(())
    }

    /// Returns the active segment, rolling to a new one if `size` does not fit.
    fn segment_with_room(&mut self, size: u64) -> JournalResult<Arc<Segment>> {
        let max = self.config.max_segment_size - DESCRIPTOR_SIZE as u64;
        if size > max {
            return Err(JournalError::RecordTooLarge { size, max });
        }

        let active = self.active_segment()?;
        if active.fits(size) {
            return Ok(active);
        }
        if active.is_empty() {
            // Written with a smaller segment size than the current config.
            return Err(JournalError::RecordTooLarge {
                size,
                max: active.max_frame_len(),
            });
        }

        self.roll(&active)
    }

    /// Seals `active` and starts the next segment.
    fn roll(&mut self, active: &Arc<Segment>) -> JournalResult<Arc<Segment>> {
        active.seal(self.config.sync_on_roll)?;

        let id = active.id() + 1;
        let first_index = active.last_index() + 1;
        match self.create_segment(id, first_index) {
            Ok(segment) => {
                info!(
                    sealed = active.id(),
                    segment = id,
                    first_index,
                    "rolled over to new segment"
                );
                Ok(segment)
            }
            Err(e) => {
                // Keep appending to the old segment once space frees up.
                active.recover(None)?;
                Err(e)
            }
        }
    }

    /// Creates and publishes an empty segment.
    fn create_segment(&self, id: u64, first_index: u64) -> JournalResult<Arc<Segment>> {
        let path = self.dir.segment_path(id);
        let max_segment_size = u32::try_from(self.config.max_segment_size).map_err(|_| {
            JournalError::invalid_config("max segment size exceeds the descriptor field")
        })?;
        let descriptor = SegmentDescriptor::new(id, first_index, max_segment_size);

        let backend = self.factory.open(&path)?;
        let segment = match Segment::create(descriptor, &path, backend, self.preallocation()) {
            Ok(segment) => segment,
            Err(e) => {
                warn!(segment = id, error = %e, "failed to create segment");
                if let Err(remove) = self.factory.remove(&path) {
                    warn!(segment = id, error = %remove, "failed to remove partial segment");
                }
                return Err(e);
            }
        };
        self.dir.sync()?;
        debug!(segment = id, first_index, "created segment");

        let segment = Arc::new(segment);
        self.shared
            .segments
            .write()
            .insert(first_index, Arc::clone(&segment));
        Ok(segment)
    }

    /// Deletes a segment file, then unpublishes it. The caller syncs the directory.
    fn delete_segment(&self, segment: &Segment) -> JournalResult<()> {
        self.remove_file(segment.path())?;
        self.shared.segments.write().remove(&segment.first_index());
        debug!(segment = segment.id(), "deleted segment");
        Ok(())
    }

    fn active_segment(&self) -> JournalResult<Arc<Segment>> {
        self.shared
            .segments
            .read()
            .values()
            .next_back()
            .cloned()
            .ok_or_else(|| JournalError::corrupted_journal("journal has no segments"))
    }

    fn preallocation(&self) -> Option<&PlatformPreallocator> {
        self.config
            .preallocate_segment_files
            .then_some(self.preallocator.as_ref())
    }

    /// Makes every appended record durable.
    ///
    /// Blocks until storage confirms. A failure leaves records flushed by
    /// earlier calls durable.
    ///
    /// # Errors
    ///
    /// Returns `Flush` wrapping the storage failure, or `Closed`.
    pub fn flush(&mut self) -> JournalResult<()> {
        self.ensure_open()?;

        let last = self.last_index();
        if last <= self.last_flushed {
            return Ok(());
        }

        let dirty: Vec<Arc<Segment>> = self
            .shared
            .segments
            .read()
            .values()
            .filter(|segment| segment.last_index() > self.last_flushed)
            .cloned()
            .collect();
        for segment in dirty {
            segment.flush().map_err(JournalError::flush)?;
        }

        self.meta.store(last).map_err(JournalError::flush)?;
        self.last_flushed = last;
        debug!(index = last, "flushed journal");
        Ok(())
    }

    /// Removes every record after `index`.
    ///
    /// Does nothing if `index` is at or past the last record. An index below
    /// the first record empties the journal; the next append then gets
    /// `first_index()` again.
    ///
    /// # Errors
    ///
    /// Returns an error if segment files cannot be deleted or cut, or the
    /// journal is closed.
    pub fn truncate(&mut self, index: u64) -> JournalResult<()> {
        self.ensure_open()?;

        if index >= self.last_index() || self.is_empty() {
            return Ok(());
        }

        let first_index = self.first_index();
        if index < first_index {
            self.replace_segments(first_index)?;
            info!(index, first_index, "truncated journal to empty");
            return Ok(());
        }

        if self.last_flushed > index {
            self.meta.store(index)?;
            self.last_flushed = index;
        }

        let doomed: Vec<Arc<Segment>> = self
            .shared
            .segments
            .read()
            .range(index + 1..)
            .map(|(_, segment)| Arc::clone(segment))
            .collect();
        for segment in doomed.iter().rev() {
            self.delete_segment(segment)?;
        }
        if !doomed.is_empty() {
            self.dir.sync()?;
        }

        let tail = self.active_segment()?;
        tail.truncate_after(index, self.preallocation())?;

        self.shared.index.write().truncate(index);
        self.shared.last_index.store(index, Ordering::Release);
        self.last_asqn = self.recompute_last_asqn();

        info!(index, deleted = doomed.len(), "truncated journal");
        Ok(())
    }

    fn recompute_last_asqn(&self) -> i64 {
        self.shared
            .segments
            .read()
            .values()
            .rev()
            .map(|segment| segment.last_asqn())
            .find(|&asqn| asqn != ASQN_IGNORE)
            .unwrap_or(ASQN_IGNORE)
    }

    /// Removes records below `index` a whole segment at a time.
    ///
    /// Every sealed segment whose records all lie below `index` is deleted;
    /// the active segment is never deleted. Records below `index` that share
    /// a segment with later records stay readable.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment file cannot be deleted, or the journal is
    /// closed.
    pub fn compact(&mut self, index: u64) -> JournalResult<()> {
        self.ensure_open()?;

        let doomed: Vec<Arc<Segment>> = {
            let segments = self.shared.segments.read();
            let sealed = segments.len().saturating_sub(1);
            segments
                .values()
                .take(sealed)
                .take_while(|segment| segment.last_index() < index)
                .cloned()
                .collect()
        };

        if let Some(last_doomed) = doomed.last() {
            let first_index = last_doomed.last_index() + 1;
            for segment in &doomed {
                self.delete_segment(segment)?;
                // Tracks the oldest segment still on disk.
                let head = segment.last_index() + 1;
                self.shared.first_index.store(head, Ordering::Release);
            }
            self.dir.sync()?;
            info!(index, deleted = doomed.len(), first_index, "compacted journal");
        }

        self.shared.index.write().compact(index);
        Ok(())
    }

    /// Deletes every record and restarts the journal at `next_index`.
    ///
    /// Used after installing a snapshot that supersedes the whole log.
    ///
    /// # Errors
    ///
    /// Returns an error if `next_index` is zero, segment files cannot be
    /// replaced, or the journal is closed.
    pub fn reset(&mut self, next_index: u64) -> JournalResult<()> {
        self.ensure_open()?;
        if next_index == 0 {
            return Err(JournalError::invalid_operation("next index must be at least 1"));
        }

        self.replace_segments(next_index)?;
        info!(next_index, "reset journal");
        Ok(())
    }

    /// Replaces all segments with one empty segment starting at `first_index`.
    fn replace_segments(&mut self, first_index: u64) -> JournalResult<()> {
        // Nothing survives, so nothing counts as flushed.
        self.meta.store(0)?;
        self.last_flushed = 0;

        let doomed: Vec<Arc<Segment>> = self.shared.segments.read().values().cloned().collect();
        let next_id = doomed.last().map_or(1, |segment| segment.id() + 1);
        for segment in doomed.iter().rev() {
            self.delete_segment(segment)?;
        }
        self.dir.sync()?;

        self.shared.index.write().clear();
        self.shared.first_index.store(first_index, Ordering::Release);
        self.shared.last_index.store(first_index - 1, Ordering::Release);
        self.last_asqn = ASQN_IGNORE;

        self.create_segment(next_id, first_index)?;
        Ok(())
    }

    /// Opens a reader positioned before the first record.
    #[must_use]
    pub fn open_reader(&self) -> JournalReader {
        JournalReader::new(Arc::clone(&self.shared))
    }

    /// Returns the last record, or `None` if the journal is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read.
    pub fn last_record(&self) -> JournalResult<Option<JournalRecord>> {
        self.ensure_open()?;
        let mut reader = self.open_reader();
        reader.seek_to_last();
        if !reader.has_next() {
            return Ok(None);
        }
        reader.next().map(Some)
    }

    /// Flushes the journal and releases it.
    ///
    /// Readers fail with `Closed` afterwards. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails; the journal stays open then.
    pub fn close(&mut self) -> JournalResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.closed = true;
        self.shared.closed.store(true, Ordering::Release);
        info!(name = %self.config.name, last_index = self.last_index(), "closed journal");
        Ok(())
    }

    fn ensure_open(&self) -> JournalResult<()> {
        if self.closed {
            return Err(JournalError::Closed);
        }
        Ok(())
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}
