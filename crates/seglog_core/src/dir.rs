//! Journal directory management.
//!
//! This module handles the file system layout of a journal named `<name>`:
//!
//! ```text
//! <directory>/
//! ├─ <name>.lock       # Advisory lock for single-writer
//! ├─ <name>.meta       # Last flushed index
//! ├─ <name>-1.log      # Segment 1
//! ├─ <name>-2.log      # Segment 2
//! └─ ...
//! ```
//!
//! The lock file ensures only one process writes to the journal at a time.
//! Several journals with different names may share a directory.

use crate::error::{JournalError, JournalResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Manages a journal's files and holds its lock.
///
/// # Thread Safety
///
/// The `JournalDir` holds an exclusive lock for its journal name. Only one
/// `JournalDir` per directory and name can exist at a time.
#[derive(Debug)]
pub struct JournalDir {
    path: PathBuf,
    name: String,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl JournalDir {
    /// Opens the directory for journal `name`, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists but is not a directory
    /// - Another process holds the lock (returns `JournalLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, name: &str) -> JournalResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(JournalError::invalid_config(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(format!("{name}.lock"));
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(JournalError::JournalLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            name: name.to_string(),
            _lock_file: lock_file,
        })
    }

    /// Returns the journal directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the journal name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the path of segment `id`.
    #[must_use]
    pub fn segment_path(&self, id: u64) -> PathBuf {
        self.path.join(format!("{}-{id}.log", self.name))
    }

    /// Returns the path of the meta file.
    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.path.join(format!("{}.meta", self.name))
    }

    /// Lists the IDs and paths of this journal's segment files, by ID.
    ///
    /// Files of other journals sharing the directory are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn list_segments(&self) -> JournalResult<Vec<(u64, PathBuf)>> {
        let prefix = format!("{}-", self.name);
        let mut segments = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let id = file_name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".log"))
                .and_then(|id| id.parse::<u64>().ok());
            if let Some(id) = id {
                if entry.file_type()?.is_file() {
                    segments.push((id, entry.path()));
                }
            }
        }

        segments.sort_unstable_by_key(|(id, _)| *id);
        Ok(segments)
    }

    /// Syncs the directory so created and deleted files are durable.
    ///
    /// Windows NTFS journals metadata itself, so this is a no-op there.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be synced.
    #[cfg(unix)]
    pub fn sync(&self) -> JournalResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    /// Syncs the directory so created and deleted files are durable.
    ///
    /// Windows NTFS journals metadata itself, so this is a no-op there.
    ///
    /// # Errors
    ///
    /// Never fails on this platform.
    #[cfg(not(unix))]
    pub fn sync(&self) -> JournalResult<()> {
        Ok(())
    }
}
