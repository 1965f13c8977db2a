//! Scan progress reporting: lightweight messages sent from the worker
//! thread to the controller via a crossbeam channel.
use crate::model::FileTree;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Where a session's tree comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSource {
    /// Live walk of the filesystem.
    Filesystem,
    /// Replay of a cache file.
    Cache,
}

/// Running counters of one walk, as seen by a progress consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanProgress {
    pub entries_visited: u64,
    pub bytes_accumulated: u64,
    pub errors: u64,
    /// Directory currently being visited.
    pub current_path: PathBuf,
    pub elapsed: Duration,
}

/// Messages sent from the worker thread to the controller.
///
/// The tree travels only inside the terminal message, so the caller never
/// observes it while the worker is still mutating it.
#[derive(Debug)]
pub enum ScanMessage {
    /// The worker has begun.
    Started { path: PathBuf, source: ScanSource },
    /// Periodic update with running totals.
    Update(ScanProgress),
    /// A non-fatal per-entry error (e.g. permission denied on one file).
    EntryError { path: PathBuf, message: String },
    /// The walk or cache load completed.
    Complete {
        tree: Box<FileTree>,
        duration: Duration,
    },
    /// The walk observed the cancellation flag. The tree is partial.
    Cancelled {
        tree: Box<FileTree>,
        duration: Duration,
    },
    /// Nothing usable was produced.
    Failed { reason: String, duration: Duration },
}

/// How many entries pass between clock reads.
const CLOCK_STRIDE: u32 = 64;

/// Rate limiter and counter set for walk progress.
#[derive(Debug)]
pub(crate) struct ProgressThrottle {
    start: Instant,
    last_emit: Instant,
    interval: Duration,
    ticks: u32,
    entries: u64,
    bytes: u64,
    errors: u64,
}

impl ProgressThrottle {
    pub(crate) fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_emit: now,
            interval,
            ticks: 0,
            entries: 0,
            bytes: 0,
            errors: 0,
        }
    }

    pub(crate) fn record_entry(&mut self, size: u64) {
        self.entries += 1;
        self.bytes = self.bytes.saturating_add(size);
    }

    pub(crate) fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Returns a snapshot when the interval has elapsed since the last one.
    pub(crate) fn poll(&mut self, current_path: &Path) -> Option<ScanProgress> {
        self.ticks += 1;
        if self.ticks < CLOCK_STRIDE {
            return None;
        }
        self.ticks = 0;

        let now = Instant::now();
        if now.duration_since(self.last_emit) < self.interval {
            return None;
        }
        self.last_emit = now;
        Some(self.snapshot(current_path))
    }

    pub(crate) fn snapshot(&self, current_path: &Path) -> ScanProgress {
        ScanProgress {
            entries_visited: self.entries,
            bytes_accumulated: self.bytes,
            errors: self.errors,
            current_path: current_path.to_path_buf(),
            elapsed: self.start.elapsed(),
        }
    }
}
