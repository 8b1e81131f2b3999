//! Test fixtures and journal helpers.
//!
//! Provides convenience functions for setting up journals in temporary
//! directories and reopening them the way a restarted process would.

use crate::crash::{CrashControl, CrashableFactory};
use crate::platform::ScriptedPlatformFs;
use seglog_core::{FileSegmentFactory, Journal, JournalConfig, SegmentFactory};
use seglog_storage::PlatformPreallocator;
use std::path::Path;
use std::sync::{Arc, Once};
use tempfile::TempDir;

/// Segment size holding exactly four 16-byte records per segment.
pub const SMALL_SEGMENT_SIZE: u64 = 32 + 4 * (24 + 16);

/// A journal directory with automatic cleanup.
///
/// The fixture owns the directory and a configuration; journals opened from
/// it are independent handles that tests drop and reopen at will.
#[derive(Debug)]
pub struct JournalFixture {
    config: JournalConfig,
    factory: Arc<CrashableFactory>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl JournalFixture {
    /// Creates a fixture using small segments and a sparse index of density 2.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a fixture whose configuration is adjusted by `configure`.
    ///
    /// The directory is always the fixture's temporary directory.
    pub fn with_config(configure: impl FnOnce(JournalConfig) -> JournalConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = JournalConfig::new(temp_dir.path())
            .name("test")
            .max_segment_size(SMALL_SEGMENT_SIZE)
            .index_density(2);
        let mut config = configure(base);
        config.directory = temp_dir.path().to_path_buf();

        Self {
            config,
            factory: Arc::new(CrashableFactory::new()),
            _temp_dir: temp_dir,
        }
    }

    /// Returns the journal directory.
    pub fn path(&self) -> &Path {
        &self.config.directory
    }

    /// Returns the fixture's configuration.
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Returns the fault control of the crashable journals.
    pub fn control(&self) -> Arc<CrashControl> {
        self.factory.control()
    }

    /// Opens the journal over plain segment files.
    pub fn open(&self) -> Journal {
        Journal::open(self.config.clone()).expect("Failed to open journal")
    }

    /// Opens the journal over crashable segment files.
    ///
    /// Appends stay in memory until flushed; faults are armed through
    /// [`JournalFixture::control`].
    pub fn open_crashable(&self) -> Journal {
        let factory: Arc<dyn SegmentFactory> = self.factory.clone();
        Journal::open_with(
            self.config.clone(),
            factory,
            Arc::new(PlatformPreallocator::new()),
        )
        .expect("Failed to open crashable journal")
    }

    /// Opens the journal with a scripted preallocation platform.
    pub fn open_scripted(&self, platform: Arc<ScriptedPlatformFs>) -> Journal {
        Journal::open_with(
            self.config.clone(),
            Arc::new(FileSegmentFactory),
            Arc::new(PlatformPreallocator::with_platform(platform)),
        )
        .expect("Failed to open journal with scripted platform")
    }

    /// Clears armed faults and reopens the journal over plain files.
    ///
    /// Use this after dropping a crashed journal to observe what survived.
    pub fn recover(&self) -> Journal {
        self.factory.control().reset();
        self.open()
    }

    /// Lists the segment file names in the directory, sorted.
    pub fn segment_files(&self) -> Vec<String> {
        let suffix = ".log";
        let prefix = format!("{}-", self.config.name);
        let mut names: Vec<String> = std::fs::read_dir(self.path())
            .expect("Failed to read journal directory")
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| name.starts_with(&prefix) && name.ends_with(suffix))
            .collect();
        names.sort();
        names
    }
}

impl Default for JournalFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a journal in a temporary directory.
///
/// # Example
///
/// ```rust
/// use seglog_core::ASQN_IGNORE;
/// use seglog_testkit::with_temp_journal;
///
/// with_temp_journal(|journal| {
///     journal.append(ASQN_IGNORE, b"entry".to_vec()).unwrap();
///     assert_eq!(journal.last_index(), 1);
/// });
/// ```
pub fn with_temp_journal<F, R>(f: F) -> R
where
    F: FnOnce(&mut Journal) -> R,
{
    let fixture = JournalFixture::new();
    let mut journal = fixture.open();
    f(&mut journal)
}

/// Returns the 16-byte payload [`fill`] writes for record `index`.
pub fn payload_for(index: u64) -> Vec<u8> {
    let mut data = index.to_le_bytes().to_vec();
    data.extend_from_slice(&index.to_be_bytes());
    data
}

/// Appends `count` records carrying [`payload_for`] their index.
///
/// Returns the index of the last appended record.
pub fn fill(journal: &mut Journal, count: u64) -> u64 {
    for _ in 0..count {
        let index = journal.next_index();
        journal
            .append(seglog_core::ASQN_IGNORE, payload_for(index))
            .expect("Failed to append record");
    }
    journal.last_index()
}

/// Installs a tracing subscriber honouring `RUST_LOG`, once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
