//! Journal configuration.

use crate::error::{JournalError, JournalResult};
use crate::segment::{DESCRIPTOR_SIZE, FRAME_HEADER_SIZE};
use std::path::PathBuf;

/// Configuration for opening a journal.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory holding the segment files.
    pub directory: PathBuf,

    /// Prefix of the segment, meta and lock file names.
    pub name: String,

    /// Maximum size of a single segment file, descriptor included.
    pub max_segment_size: u64,

    /// Every `index_density`-th record is sampled into the sparse index.
    pub index_density: usize,

    /// Whether to reserve each segment's full size when it is created.
    pub preallocate_segment_files: bool,

    /// Index of the first record of a brand-new journal.
    pub first_index: u64,

    /// Whether to flush a segment when it is sealed by a rollover.
    pub sync_on_roll: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("journal"),
            name: "journal".to_string(),
            max_segment_size: 128 * 1024 * 1024, // 128 MB
            index_density: 100,
            preallocate_segment_files: true,
            first_index: 1,
            sync_on_roll: true,
        }
    }
}

impl JournalConfig {
    /// Creates a configuration for a journal stored in `directory`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Sets the file name prefix.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the maximum segment file size.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets the sparse index sampling density.
    #[must_use]
    pub const fn index_density(mut self, density: usize) -> Self {
        self.index_density = density;
        self
    }

    /// Sets whether segment files are preallocated.
    #[must_use]
    pub const fn preallocate_segment_files(mut self, value: bool) -> Self {
        self.preallocate_segment_files = value;
        self
    }

    /// Sets the index of the first record of a new journal.
    #[must_use]
    pub const fn first_index(mut self, index: u64) -> Self {
        self.first_index = index;
        self
    }

    /// Sets whether sealed segments are flushed on rollover.
    #[must_use]
    pub const fn sync_on_roll(mut self, value: bool) -> Self {
        self.sync_on_roll = value;
        self
    }

    /// Checks that the configuration describes a usable journal.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidConfig`] if:
    /// - `index_density` is zero
    /// - `first_index` is zero
    /// - a segment cannot hold a descriptor plus one frame header
    /// - `max_segment_size` does not fit the descriptor's 32-bit field
    /// - `name` is empty or contains a path separator
    pub fn validate(&self) -> JournalResult<()> {
        if self.index_density == 0 {
            return Err(JournalError::invalid_config("index density must be at least 1"));
        }
        if self.first_index == 0 {
            return Err(JournalError::invalid_config("first index must be at least 1"));
        }
        let min = (DESCRIPTOR_SIZE + FRAME_HEADER_SIZE) as u64;
        if self.max_segment_size < min {
            return Err(JournalError::invalid_config(format!(
                "max segment size {} is below the minimum of {min} bytes",
                self.max_segment_size
            )));
        }
        if self.max_segment_size > u64::from(u32::MAX) {
            return Err(JournalError::invalid_config(format!(
                "max segment size {} exceeds {} bytes",
                self.max_segment_size,
                u32::MAX
            )));
        }
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(JournalError::invalid_config(format!(
                "invalid journal name {:?}",
                self.name
            )));
        }
        Ok(())
    }
}
