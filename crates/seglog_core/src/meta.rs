//! Persistent record of the last flushed index.
//!
//! Layout (12 bytes, little-endian):
//!
//! ```text
//! | last_flushed_index (8) | crc32 (4) |
//! ```
//!
//! The value is rewritten in place after every successful flush. Zero means
//! nothing has been flushed. An unreadable file is treated as zero, which only
//! weakens corruption detection on the next open.

use crate::error::JournalResult;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const META_SIZE: usize = 12;

/// Stores the journal's last flushed index.
#[derive(Debug)]
pub struct MetaStore {
    path: PathBuf,
    file: File,
}

impl MetaStore {
    /// Opens or creates the meta file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> JournalResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Returns the path of the meta file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored index, or zero if none is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn load(&mut self) -> JournalResult<u64> {
        let mut buf = Vec::with_capacity(META_SIZE);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut buf)?;

        if buf.is_empty() {
            return Ok(0);
        }
        if buf.len() != META_SIZE {
            warn!(path = %self.path.display(), len = buf.len(), "ignoring meta file of unexpected size");
            return Ok(0);
        }

        let index = u64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ]);
        let stored_crc = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if crc32fast::hash(&buf[..8]) != stored_crc {
            warn!(path = %self.path.display(), "ignoring meta file with bad checksum");
            return Ok(0);
        }
        Ok(index)
    }

    /// Durably stores `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or sync fails.
    pub fn store(&mut self, index: u64) -> io::Result<()> {
        let mut buf = [0u8; META_SIZE];
        buf[..8].copy_from_slice(&index.to_le_bytes());
        let crc = crc32fast::hash(&buf[..8]);
        buf[8..].copy_from_slice(&crc.to_le_bytes());

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        Ok(())
    }
}
