//! Scripted platform preallocation calls.

use parking_lot::Mutex;
use seglog_storage::{NativePlatformFs, PlatformCode, PlatformFs};
use std::collections::VecDeque;
use std::fs::File;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A [`PlatformFs`] answering from a queue of scripted results.
///
/// Each call pops the next result. Once the queue is empty, calls go to the
/// host platform so files still get reserved. Every call is counted.
#[derive(Debug, Default)]
pub struct ScriptedPlatformFs {
    script: Mutex<VecDeque<Result<(), PlatformCode>>>,
    calls: AtomicUsize,
}

impl ScriptedPlatformFs {
    /// Creates a platform that answers with `script` first.
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = Result<(), PlatformCode>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Queues another failure.
    pub fn push_err(&self, code: PlatformCode) {
        self.script.lock().push_back(Err(code));
    }

    /// Returns the number of calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the number of scripted results not yet used.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl PlatformFs for ScriptedPlatformFs {
    fn allocate(&self, file: &File, offset: u64, len: u64) -> Result<(), PlatformCode> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some(result) => result,
            None => NativePlatformFs.allocate(file, offset, len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglog_storage::{PlatformPreallocator, PreallocateError, Preallocation};

    #[test]
    fn answers_from_script_then_platform() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("f")).unwrap();
        let platform = ScriptedPlatformFs::new([Err(PlatformCode::NoSpace)]);
        let preallocator = PlatformPreallocator::with_platform(platform.clone());

        let err = preallocator.preallocate(&file, 0, 4096).unwrap_err();
        assert!(matches!(err, PreallocateError::OutOfDiskSpace { length: 4096, .. }));
        assert_eq!(platform.remaining(), 0);

        platform.push_err(PlatformCode::BadDescriptor);
        assert!(matches!(
            preallocator.preallocate(&file, 0, 4096),
            Err(PreallocateError::Io {
                code: PlatformCode::BadDescriptor
            })
        ));

        // Script exhausted: the host call reserves, or reports it cannot
        let outcome = preallocator.preallocate(&file, 0, 4096).unwrap();
        if outcome == Preallocation::Reserved {
            assert!(file.metadata().unwrap().len() >= 4096);
        }
        assert_eq!(platform.calls(), 3);
    }
}
