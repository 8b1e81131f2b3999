//! A single segment file.

use crate::error::{JournalError, JournalResult};
use crate::index::{IndexEntry, SparseJournalIndex};
use crate::record::{JournalRecord, ASQN_IGNORE};
use crate::segment::descriptor::{SegmentDescriptor, DESCRIPTOR_SIZE};
use crate::segment::frame::{self, FrameHeader, FRAME_HEADER_SIZE};
use parking_lot::RwLock;
use seglog_storage::{PlatformPreallocator, StorageBackend, StorageError};
use std::path::{Path, PathBuf};
use tracing::trace;

/// How the scan of a segment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// Zeroed space or the end of the file followed the last record.
    Clean,
    /// Bytes that are not a valid next record followed the last record.
    Torn,
}

/// Result of reading one frame.
enum FrameRead {
    Record(JournalRecord, u64),
    End,
    Invalid,
}

/// A segment file holding a contiguous run of records.
///
/// The segment shares its backend between the journal's writer and any
/// number of readers. All mutable state sits behind one lock; readers
/// only ever take it shared.
pub struct Segment {
    descriptor: SegmentDescriptor,
    path: PathBuf,
    inner: RwLock<SegmentInner>,
}

struct SegmentInner {
    backend: Box<dyn StorageBackend>,
    /// Index of the last record, `first_index - 1` when empty.
    last_index: u64,
    /// Last ASQN written, or `ASQN_IGNORE`.
    last_asqn: i64,
    /// Offset where the next frame is written.
    position: u64,
    sealed: bool,
}

impl Segment {
    /// Writes a fresh segment into `backend`, discarding whatever it held.
    ///
    /// With a preallocator the whole segment is reserved up front.
    ///
    /// # Errors
    ///
    /// Returns `StorageFull` if the reservation runs out of space and a
    /// storage error for any other failure.
    pub fn create(
        descriptor: SegmentDescriptor,
        path: impl Into<PathBuf>,
        mut backend: Box<dyn StorageBackend>,
        preallocator: Option<&PlatformPreallocator>,
    ) -> JournalResult<Self> {
        if backend.size()? > 0 {
            backend.truncate(0)?;
        }
        backend.append(&descriptor.encode())?;

        let start = DESCRIPTOR_SIZE as u64;
        if let Some(preallocator) = preallocator {
            let len = u64::from(descriptor.max_segment_size).saturating_sub(start);
            reserve(backend.as_mut(), start, len, preallocator)?;
        }
        backend.sync()?;

        Ok(Self {
            descriptor,
            path: path.into(),
            inner: RwLock::new(SegmentInner {
                backend,
                last_index: descriptor.first_index - 1,
                last_asqn: ASQN_IGNORE,
                position: start,
                sealed: false,
            }),
        })
    }

    /// Opens an existing segment and scans every record in it.
    ///
    /// Each valid record is fed to `index`. Scanning stops at the first frame
    /// that is not the expected next record; whether that was clean zeroed
    /// space or something else is reported alongside the segment.
    ///
    /// # Errors
    ///
    /// Returns `SegmentCorruption` if the descriptor is missing or damaged.
    pub fn open(
        path: impl Into<PathBuf>,
        backend: Box<dyn StorageBackend>,
        index: &mut SparseJournalIndex,
    ) -> JournalResult<(Self, ScanEnd)> {
        let path = path.into();
        if backend.capacity()? < DESCRIPTOR_SIZE as u64 {
            return Err(JournalError::segment_corruption(format!(
                "{} is shorter than a segment descriptor",
                path.display()
            )));
        }
        let descriptor = SegmentDescriptor::decode(&backend.read_at(0, DESCRIPTOR_SIZE)?)?;
        if descriptor.first_index == 0 {
            return Err(JournalError::segment_corruption(format!(
                "{} starts at index 0",
                path.display()
            )));
        }

        let limit = u64::from(descriptor.max_segment_size);
        let mut position = DESCRIPTOR_SIZE as u64;
        let mut expected = descriptor.first_index;
        let mut last_asqn = ASQN_IGNORE;

        let end = loop {
            match read_frame(backend.as_ref(), limit, position, expected)? {
                FrameRead::Record(record, next) => {
                    index.index(&record, position);
                    if record.has_asqn() {
                        last_asqn = record.asqn();
                    }
                    position = next;
                    expected += 1;
                }
                FrameRead::End => break ScanEnd::Clean,
                FrameRead::Invalid => break ScanEnd::Torn,
            }
        };

        let segment = Self {
            descriptor,
            path,
            inner: RwLock::new(SegmentInner {
                backend,
                last_index: expected - 1,
                last_asqn,
                position,
                sealed: true,
            }),
        };
        Ok((segment, end))
    }

    /// Returns the segment's descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &SegmentDescriptor {
        &self.descriptor
    }

    /// Returns the segment ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.descriptor.id
    }

    /// Returns the path of the segment file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the index of the first record this segment holds or will hold.
    #[must_use]
    pub fn first_index(&self) -> u64 {
        self.descriptor.first_index
    }

    /// Returns the index of the last record, `first_index - 1` when empty.
    #[must_use]
    pub fn last_index(&self) -> u64 {
        self.inner.read().last_index
    }

    /// Returns the last ASQN written to this segment, or `ASQN_IGNORE`.
    #[must_use]
    pub fn last_asqn(&self) -> i64 {
        self.inner.read().last_asqn
    }

    /// Returns whether the segment holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_index() < self.first_index()
    }

    /// Returns whether `index` falls within this segment's records.
    #[must_use]
    pub fn contains(&self, index: u64) -> bool {
        index >= self.first_index() && index <= self.last_index()
    }

    /// Returns the offset where the next frame will be written.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.inner.read().position
    }

    /// Returns whether the segment has been sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.inner.read().sealed
    }

    /// Returns the largest frame an empty segment of this size can hold.
    #[must_use]
    pub fn max_frame_len(&self) -> u64 {
        u64::from(self.descriptor.max_segment_size).saturating_sub(DESCRIPTOR_SIZE as u64)
    }

    /// Returns whether a frame of `frame_len` bytes still fits.
    #[must_use]
    pub fn fits(&self, frame_len: u64) -> bool {
        self.position() + frame_len <= u64::from(self.descriptor.max_segment_size)
    }

    /// Appends a record and returns the offset of its frame.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the segment is sealed or the frame does not fit
    /// - the record does not carry the next index
    /// - the write fails
    pub fn append(&self, record: &JournalRecord) -> JournalResult<u64> {
        let mut inner = self.inner.write();

        if inner.sealed {
            return Err(JournalError::invalid_operation(format!(
                "segment {} is sealed",
                self.descriptor.id
            )));
        }
        let expected = inner.last_index + 1;
        if record.index() != expected {
            return Err(JournalError::InvalidIndex {
                expected,
                actual: record.index(),
            });
        }

        let frame = frame::encode(record);
        if inner.position + frame.len() as u64 > u64::from(self.descriptor.max_segment_size) {
            return Err(JournalError::invalid_operation(format!(
                "segment {} has no room for a {} byte frame",
                self.descriptor.id,
                frame.len()
            )));
        }

        let offset = inner.backend.append(&frame)?;
        inner.position = offset + frame.len() as u64;
        inner.last_index = record.index();
        if record.has_asqn() {
            inner.last_asqn = record.asqn();
        }

        Ok(offset)
    }

    /// Reads the record `expected_index` from the frame at `position`.
    ///
    /// Returns `None` if the record is not (or no longer) in this segment at
    /// that offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    pub fn read(
        &self,
        position: u64,
        expected_index: u64,
    ) -> JournalResult<Option<(JournalRecord, u64)>> {
        let inner = self.inner.read();
        if expected_index < self.descriptor.first_index || expected_index > inner.last_index {
            return Ok(None);
        }

        match read_frame(inner.backend.as_ref(), inner.position, position, expected_index)? {
            FrameRead::Record(record, next) => Ok(Some((record, next))),
            FrameRead::End | FrameRead::Invalid => Ok(None),
        }
    }

    /// Finds the frame offset of record `index`.
    ///
    /// Scanning starts at `hint` when it lies within this segment at or before
    /// `index`, and at the first record otherwise. Only frame headers are read.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    pub fn position_of(&self, index: u64, hint: Option<IndexEntry>) -> JournalResult<Option<u64>> {
        let inner = self.inner.read();
        if index < self.descriptor.first_index || index > inner.last_index {
            return Ok(None);
        }

        let (mut position, mut current) = match hint {
            Some(entry) if entry.index >= self.descriptor.first_index && entry.index <= index => {
                (entry.position, entry.index)
            }
            _ => (DESCRIPTOR_SIZE as u64, self.descriptor.first_index),
        };

        while current < index {
            match next_header(inner.backend.as_ref(), inner.position, position, current)? {
                Some(header) => {
                    position += header.frame_len();
                    current += 1;
                }
                None => return Ok(None),
            }
        }
        Ok(Some(position))
    }

    /// Removes every record after `index` and makes this the writable segment.
    ///
    /// The file is cut at the first removed frame and the freed capacity is
    /// reserved again when a preallocator is given. Calling this with an
    /// index at or past the last record only reopens the segment for writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be scanned, cut or reserved.
    pub fn truncate_after(
        &self,
        index: u64,
        preallocator: Option<&PlatformPreallocator>,
    ) -> JournalResult<()> {
        let mut inner = self.inner.write();
        let first = self.descriptor.first_index;

        if index < inner.last_index {
            let keep = index.max(first - 1);
            let mut position = DESCRIPTOR_SIZE as u64;
            let mut last_asqn = ASQN_IGNORE;
            let mut current = first;
            while current <= keep {
                let header = next_header(inner.backend.as_ref(), inner.position, position, current)?
                    .ok_or_else(|| {
                        JournalError::segment_corruption(format!(
                            "record {current} missing from segment {}",
                            self.descriptor.id
                        ))
                    })?;
                if header.asqn != ASQN_IGNORE {
                    last_asqn = header.asqn;
                }
                position += header.frame_len();
                current += 1;
            }

            inner.position = position;
            inner.last_index = keep;
            inner.last_asqn = last_asqn;
            trace!(segment = self.descriptor.id, index = keep, position, "cut segment");
        }

        self.activate(&mut inner, preallocator)
    }

    /// Makes an opened segment writable again at its scanned end.
    ///
    /// Anything past the last valid record is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be cut or reserved.
    pub fn recover(&self, preallocator: Option<&PlatformPreallocator>) -> JournalResult<()> {
        let mut inner = self.inner.write();
        self.activate(&mut inner, preallocator)
    }

    fn activate(
        &self,
        inner: &mut SegmentInner,
        preallocator: Option<&PlatformPreallocator>,
    ) -> JournalResult<()> {
        let position = inner.position;
        if inner.backend.size()? > position {
            inner.backend.truncate(position)?;
        }
        if let Some(preallocator) = preallocator {
            let len = u64::from(self.descriptor.max_segment_size).saturating_sub(position);
            reserve(inner.backend.as_mut(), position, len, preallocator)?;
        }
        inner.sealed = false;
        Ok(())
    }

    /// Marks the segment read-only, flushing it first if asked to.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails; the segment stays writable then.
    pub fn seal(&self, flush: bool) -> JournalResult<()> {
        let mut inner = self.inner.write();
        if flush {
            inner.backend.flush()?;
        }
        inner.sealed = true;
        Ok(())
    }

    /// Forces written frames to stable storage.
    ///
    /// # Errors
    ///
    /// Returns the storage failure unchanged.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.inner.write().backend.flush()
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Segment")
            .field("id", &self.descriptor.id)
            .field("first_index", &self.descriptor.first_index)
            .field("last_index", &inner.last_index)
            .field("position", &inner.position)
            .field("sealed", &inner.sealed)
            .finish_non_exhaustive()
    }
}

/// Reserves space, retrying interrupted platform calls.
fn reserve(
    backend: &mut dyn StorageBackend,
    offset: u64,
    len: u64,
    preallocator: &PlatformPreallocator,
) -> JournalResult<()> {
    loop {
        match backend.reserve(offset, len, preallocator) {
            Err(StorageError::Preallocate(e)) if e.is_retryable() => {
                trace!(offset, len, "preallocation interrupted, retrying");
            }
            result => return result.map_err(JournalError::from),
        }
    }
}

/// Reads the header at `position` if it is the frame of record `expected`
/// and the frame ends before `limit`.
fn next_header(
    backend: &dyn StorageBackend,
    limit: u64,
    position: u64,
    expected: u64,
) -> JournalResult<Option<FrameHeader>> {
    let limit = limit.min(backend.capacity()?);
    if position + FRAME_HEADER_SIZE as u64 > limit {
        return Ok(None);
    }
    let header = FrameHeader::decode(&backend.read_at(position, FRAME_HEADER_SIZE)?);
    if header.index != expected || position + header.frame_len() > limit {
        return Ok(None);
    }
    Ok(Some(header))
}

/// Reads and verifies the frame of record `expected` at `position`.
///
/// Frames may not extend past `limit`. Zeroed bytes and the end of the
/// backend read as `End`; anything else that is not the expected, intact
/// record reads as `Invalid`.
fn read_frame(
    backend: &dyn StorageBackend,
    limit: u64,
    position: u64,
    expected: u64,
) -> JournalResult<FrameRead> {
    let limit = limit.min(backend.capacity()?);
    if position >= limit {
        return Ok(FrameRead::End);
    }

    let available = (limit - position).min(FRAME_HEADER_SIZE as u64) as usize;
    let header_bytes = backend.read_at(position, available)?;
    if header_bytes.iter().all(|&b| b == 0) {
        return Ok(FrameRead::End);
    }
    if available < FRAME_HEADER_SIZE {
        return Ok(FrameRead::Invalid);
    }

    let header = FrameHeader::decode(&header_bytes);
    if header.index != expected || position + header.frame_len() > limit {
        return Ok(FrameRead::Invalid);
    }

    let payload = backend.read_at(position + FRAME_HEADER_SIZE as u64, header.length as usize)?;
    let record = JournalRecord::from_parts(header.index, header.asqn, header.checksum, payload);
    if !record.verify_checksum() {
        return Ok(FrameRead::Invalid);
    }

    Ok(FrameRead::Record(record, position + header.frame_len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglog_storage::InMemoryBackend;

    const MAX: u32 = 4096;

    fn create_segment(first_index: u64) -> Segment {
        Segment::create(
            SegmentDescriptor::new(1, first_index, MAX),
            "seg-1.log",
            Box::new(InMemoryBackend::new()),
            Some(&PlatformPreallocator::disabled()),
        )
        .unwrap()
    }

    fn append_n(segment: &Segment, from: u64, n: u64) -> Vec<u64> {
        (from..from + n)
            .map(|i| {
                segment
                    .append(&JournalRecord::new(i, i as i64 * 10, vec![i as u8; 8]))
                    .unwrap()
            })
            .collect()
    }

    /// Reopens the bytes written by `segment` as a fresh backend.
    fn reopen(bytes: Vec<u8>) -> (Segment, ScanEnd, SparseJournalIndex) {
        let mut index = SparseJournalIndex::new(1);
        let (segment, end) =
            Segment::open("seg-1.log", Box::new(InMemoryBackend::with_data(bytes)), &mut index)
                .unwrap();
        (segment, end, index)
    }

    fn raw_bytes(segment: &Segment) -> Vec<u8> {
        let inner = segment.inner.read();
        let capacity = inner.backend.capacity().unwrap();
        inner.backend.read_at(0, capacity as usize).unwrap()
    }

    #[test]
    fn create_reserves_full_segment() {
        let segment = create_segment(1);
        assert!(segment.is_empty());
        assert_eq!(segment.last_index(), 0);
        assert_eq!(segment.position(), DESCRIPTOR_SIZE as u64);
        assert_eq!(raw_bytes(&segment).len(), MAX as usize);
    }

    #[test]
    fn append_and_read_back() {
        let segment = create_segment(5);
        let positions = append_n(&segment, 5, 3);

        assert_eq!(positions[0], DESCRIPTOR_SIZE as u64);
        assert_eq!(segment.last_index(), 7);
        assert_eq!(segment.last_asqn(), 70);

        let (record, next) = segment.read(positions[1], 6).unwrap().unwrap();
        assert_eq!(record.index(), 6);
        assert_eq!(record.data(), &[6u8; 8]);
        assert_eq!(next, positions[2]);

        // Wrong index at a valid offset, and unpublished indices
        assert!(segment.read(positions[1], 7).unwrap().is_none());
        assert!(segment.read(segment.position(), 8).unwrap().is_none());
    }

    #[test]
    fn append_rejects_wrong_index() {
        let segment = create_segment(1);
        let result = segment.append(&JournalRecord::new(2, ASQN_IGNORE, vec![]));
        assert!(matches!(
            result,
            Err(JournalError::InvalidIndex {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn append_rejects_when_full_or_sealed() {
        let segment = create_segment(1);
        let big = vec![0u8; (MAX as usize) - DESCRIPTOR_SIZE - FRAME_HEADER_SIZE];
        assert!(segment.fits(frame::frame_len(big.len())));
        segment.append(&JournalRecord::new(1, ASQN_IGNORE, big)).unwrap();
        assert!(!segment.fits(frame::frame_len(0)));
        assert!(segment
            .append(&JournalRecord::new(2, ASQN_IGNORE, vec![]))
            .is_err());

        let segment = create_segment(1);
        segment.seal(true).unwrap();
        assert!(segment.is_sealed());
        assert!(segment
            .append(&JournalRecord::new(1, ASQN_IGNORE, vec![]))
            .is_err());
    }

    #[test]
    fn position_of_uses_hint() {
        let segment = create_segment(1);
        let positions = append_n(&segment, 1, 10);

        assert_eq!(segment.position_of(7, None).unwrap(), Some(positions[6]));
        let hint = IndexEntry {
            index: 5,
            position: positions[4],
        };
        assert_eq!(segment.position_of(7, Some(hint)).unwrap(), Some(positions[6]));
        assert_eq!(segment.position_of(5, Some(hint)).unwrap(), Some(positions[4]));

        // A hint past the target is ignored
        let late = IndexEntry {
            index: 9,
            position: positions[8],
        };
        assert_eq!(segment.position_of(3, Some(late)).unwrap(), Some(positions[2]));

        assert_eq!(segment.position_of(11, None).unwrap(), None);
        assert_eq!(segment.position_of(0, None).unwrap(), None);
    }

    #[test]
    fn reopen_scans_records_and_rebuilds_index() {
        let segment = create_segment(1);
        let positions = append_n(&segment, 1, 4);

        let (reopened, end, index) = reopen(raw_bytes(&segment));
        assert_eq!(end, ScanEnd::Clean);
        assert_eq!(reopened.last_index(), 4);
        assert_eq!(reopened.last_asqn(), 40);
        assert_eq!(reopened.position(), segment.position());
        assert!(reopened.is_sealed());
        assert_eq!(
            index.lookup(3),
            Some(IndexEntry {
                index: 3,
                position: positions[2]
            })
        );
    }

    #[test]
    fn reopen_detects_torn_tail() {
        let segment = create_segment(1);
        append_n(&segment, 1, 3);
        let end_of_valid = segment.position() as usize;

        // A frame whose payload never made it to disk
        let mut bytes = raw_bytes(&segment);
        let torn = frame::encode(&JournalRecord::new(4, ASQN_IGNORE, vec![9; 32]));
        bytes[end_of_valid..end_of_valid + FRAME_HEADER_SIZE]
            .copy_from_slice(&torn[..FRAME_HEADER_SIZE]);

        let (reopened, end, _) = reopen(bytes);
        assert_eq!(end, ScanEnd::Torn);
        assert_eq!(reopened.last_index(), 3);
        assert_eq!(reopened.position(), end_of_valid as u64);

        // Recovery cuts the garbage and appends resume at the same offset
        reopened.recover(None).unwrap();
        let offset = reopened
            .append(&JournalRecord::new(4, ASQN_IGNORE, vec![1]))
            .unwrap();
        assert_eq!(offset, end_of_valid as u64);
        assert_eq!(reopened.read(offset, 4).unwrap().unwrap().0.data(), &[1]);
    }

    #[test]
    fn reopen_detects_flipped_payload_bit() {
        let segment = create_segment(1);
        let positions = append_n(&segment, 1, 3);

        let mut bytes = raw_bytes(&segment);
        bytes[positions[2] as usize + FRAME_HEADER_SIZE] ^= 0x01;

        let (reopened, end, _) = reopen(bytes);
        assert_eq!(end, ScanEnd::Torn);
        assert_eq!(reopened.last_index(), 2);
    }

    #[test]
    fn reopen_rejects_damaged_descriptor() {
        let segment = create_segment(1);
        let mut bytes = raw_bytes(&segment);
        bytes[9] ^= 0xFF;

        let mut index = SparseJournalIndex::new(1);
        let result = Segment::open("x", Box::new(InMemoryBackend::with_data(bytes)), &mut index);
        assert!(matches!(result, Err(JournalError::SegmentCorruption { .. })));

        let result = Segment::open(
            "x",
            Box::new(InMemoryBackend::with_data(vec![0; 8])),
            &mut index,
        );
        assert!(matches!(result, Err(JournalError::SegmentCorruption { .. })));
    }

    #[test]
    fn truncate_after_cuts_and_resumes() {
        let segment = create_segment(1);
        let positions = append_n(&segment, 1, 6);

        segment.truncate_after(3, None).unwrap();
        assert_eq!(segment.last_index(), 3);
        assert_eq!(segment.last_asqn(), 30);
        assert_eq!(segment.position(), positions[3]);
        assert!(segment.read(positions[3], 4).unwrap().is_none());

        // Removed frames do not come back after a reopen
        let (reopened, end, _) = reopen(raw_bytes(&segment));
        assert_eq!(end, ScanEnd::Clean);
        assert_eq!(reopened.last_index(), 3);

        let offset = segment
            .append(&JournalRecord::new(4, ASQN_IGNORE, vec![0xAB]))
            .unwrap();
        assert_eq!(offset, positions[3]);
        assert_eq!(segment.last_asqn(), 30);
    }

    #[test]
    fn truncate_after_everything() {
        let segment = create_segment(10);
        append_n(&segment, 10, 3);

        segment.truncate_after(9, None).unwrap();
        assert!(segment.is_empty());
        assert_eq!(segment.last_asqn(), ASQN_IGNORE);
        assert_eq!(segment.position(), DESCRIPTOR_SIZE as u64);
    }

    #[test]
    fn truncate_after_reopens_sealed_segment() {
        let segment = create_segment(1);
        append_n(&segment, 1, 2);
        segment.seal(false).unwrap();

        segment.truncate_after(2, None).unwrap();
        assert!(!segment.is_sealed());
        assert_eq!(segment.last_index(), 2);
        segment
            .append(&JournalRecord::new(3, ASQN_IGNORE, vec![]))
            .unwrap();
    }
}
