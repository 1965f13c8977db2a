//! Scanner module: runs one scan session on a background thread.
//!
//! A session either walks the filesystem ([`walker::walk`]) or replays a
//! cache file ([`crate::cache::read_cache`]). Both report through the same
//! [`ScanMessage`] stream so a consumer cannot tell them apart until the
//! terminal message arrives.
//!
//! The worker owns the tree for the whole session and hands it over only in
//! `Complete` / `Cancelled`. The cancellation flag is the one piece of state
//! shared with the caller.
pub mod progress;
pub mod walker;

use crate::cache;
use crate::config::ScanConfig;
use crate::error::CoreError;
use crate::model::ScanOutcome;
use progress::{ScanMessage, ScanProgress, ScanSource};
use walker::WalkVisitor;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{info, warn};

/// Maximum number of messages that may queue up in the channel.
///
/// Progress and per-entry errors are dropped when the channel is full;
/// lifecycle messages block until the consumer drains it.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 4_096;

/// Spawn the worker thread for one session.
pub(crate) fn spawn_worker(
    source: ScanSource,
    path: PathBuf,
    config: ScanConfig,
    cancel: Arc<AtomicBool>,
) -> Result<(Receiver<ScanMessage>, JoinHandle<()>), CoreError> {
    let (tx, rx) = crossbeam_channel::bounded::<ScanMessage>(PROGRESS_CHANNEL_CAPACITY);

    let handle = thread::Builder::new()
        .name("dirsleuth-scanner".into())
        .spawn(move || run_job(source, &path, &config, &cancel, &tx))
        .map_err(CoreError::Spawn)?;

    Ok((rx, handle))
}

fn run_job(
    source: ScanSource,
    path: &Path,
    config: &ScanConfig,
    cancel: &AtomicBool,
    tx: &Sender<ScanMessage>,
) {
    let start = Instant::now();
    // A send only fails once the controller is gone; nobody is left to tell.
    let _ = tx.send(ScanMessage::Started {
        path: path.to_path_buf(),
        source,
    });

    let result = match source {
        ScanSource::Filesystem => {
            info!("Starting scan of {}", path.display());
            let mut visitor = ChannelVisitor { tx, dropped: 0 };
            let result = walker::walk(path, config, cancel, &mut visitor);
            if visitor.dropped > 0 {
                warn!("{} progress messages dropped (consumer lagging)", visitor.dropped);
            }
            result
        }
        ScanSource::Cache => {
            info!("Loading cache {}", path.display());
            cache::read_cache(path)
        }
    };

    let duration = start.elapsed();
    let message = match result {
        Ok(tree) if source == ScanSource::Filesystem && tree.outcome() == ScanOutcome::Aborted => {
            info!("Scan of {} aborted after {:?}", path.display(), duration);
            ScanMessage::Cancelled {
                tree: Box::new(tree),
                duration,
            }
        }
        Ok(tree) => {
            info!(
                "{} entries ({} bytes) ready after {:?}",
                tree.len(),
                tree.total_size(),
                duration
            );
            ScanMessage::Complete {
                tree: Box::new(tree),
                duration,
            }
        }
        Err(err) => {
            warn!("Session on {} failed: {err}", path.display());
            ScanMessage::Failed {
                reason: err.to_string(),
                duration,
            }
        }
    };
    let _ = tx.send(message);
}

/// Forwards walk notifications to the controller without ever blocking
/// the walk.
struct ChannelVisitor<'a> {
    tx: &'a Sender<ScanMessage>,
    dropped: u64,
}

impl ChannelVisitor<'_> {
    fn offer(&mut self, message: ScanMessage) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(message) {
            self.dropped += 1;
        }
    }
}

impl WalkVisitor for ChannelVisitor<'_> {
    fn progress(&mut self, progress: &ScanProgress) {
        self.offer(ScanMessage::Update(progress.clone()));
    }

    fn entry_error(&mut self, path: &Path, message: &str) {
        self.offer(ScanMessage::EntryError {
            path: path.to_path_buf(),
            message: message.to_string(),
        });
    }
}
