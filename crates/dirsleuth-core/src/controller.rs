//! Scan lifecycle state machine.
//!
//! The controller is driven from the caller's thread. The worker thread
//! never touches controller state: it only sends [`ScanMessage`]s, and the
//! caller applies them by pumping [`ScanController::process_messages`] or
//! [`ScanController::wait`]. Every event is therefore observed on the
//! caller's thread, after the transition it describes has been applied.
use crate::cache;
use crate::config::ScanConfig;
use crate::error::CoreError;
use crate::model::FileTree;
use crate::scanner::progress::{ScanMessage, ScanProgress, ScanSource};
use crate::scanner::spawn_worker;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Maximum number of messages applied per [`ScanController::process_messages`]
/// call, so a backlog cannot stall the caller.
const MAX_MESSAGES_PER_POLL: usize = 300;

/// Lifecycle state of a [`ScanController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanState {
    Idle,
    Scanning,
    Finished,
    Aborted,
    Failed,
}

impl ScanState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }

    /// `Finished`, `Aborted` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted | Self::Failed)
    }
}

/// Notification delivered to the caller while pumping the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Started { path: PathBuf, source: ScanSource },
    Progress(ScanProgress),
    EntryError { path: PathBuf, message: String },
    Finished { duration: Duration },
    Aborted { duration: Duration },
    Failed { reason: String },
}

impl ScanEvent {
    /// `true` for the event that ends a session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::Aborted { .. } | Self::Failed { .. }
        )
    }
}

/// The one live session of a controller.
struct ScanSession {
    source: ScanSource,
    target: PathBuf,
    cancel: Arc<AtomicBool>,
    rx: Receiver<ScanMessage>,
    thread: Option<JoinHandle<()>>,
    started: Instant,
}

/// Owns the tree and runs at most one scan or cache load at a time.
pub struct ScanController {
    config: ScanConfig,
    state: ScanState,
    tree: FileTree,
    root_path: PathBuf,
    /// Root a [`refresh`](ScanController::refresh) would walk again.
    last_root: Option<PathBuf>,
    session: Option<ScanSession>,
    failure: Option<String>,
    last_duration: Option<Duration>,
}

impl Default for ScanController {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

impl ScanController {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            state: ScanState::Idle,
            tree: FileTree::new(),
            root_path: PathBuf::new(),
            last_root: None,
            session: None,
            failure: None,
            last_duration: None,
        }
    }

    // ── Operations ─────────────────────────────────────────────

    /// Begin walking `path` on a background thread.
    pub fn start_scan(&mut self, path: impl Into<PathBuf>) -> Result<(), CoreError> {
        self.begin(ScanSource::Filesystem, path.into(), "start a scan")
    }

    /// Begin loading a cache file on a background thread.
    ///
    /// Emits the same events as a live scan. A load cannot be cancelled:
    /// [`abort_scan`](Self::abort_scan) is rejected while it runs.
    pub fn load_cache(&mut self, path: impl Into<PathBuf>) -> Result<(), CoreError> {
        self.begin(ScanSource::Cache, path.into(), "load a cache")
    }

    /// Walk the root of the last session again, whether its tree came from
    /// a scan or from a cache.
    pub fn refresh(&mut self) -> Result<(), CoreError> {
        if self.state == ScanState::Scanning {
            return Err(self.reject("refresh"));
        }
        let Some(root) = self.last_root.clone() else {
            return Err(self.reject("refresh without a scanned root"));
        };
        self.begin(ScanSource::Filesystem, root, "refresh")
    }

    /// Ask the running scan to stop.
    ///
    /// The transition to `Aborted` happens when the worker acknowledges; a
    /// walk that completes first still ends `Finished`.
    pub fn abort_scan(&mut self) -> Result<(), CoreError> {
        let Some(session) = self.session.as_ref().filter(|_| self.state == ScanState::Scanning)
        else {
            return Err(self.reject("abort a scan"));
        };
        if session.source == ScanSource::Cache {
            return Err(self.reject("abort a cache load"));
        }
        info!("Abort requested for {}", session.target.display());
        session.cancel.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Write the current tree to `path`. Allowed after a finished or an
    /// aborted session; an aborted tree is saved with its partial markers.
    pub fn save_cache(&self, path: &Path) -> Result<(), CoreError> {
        match self.state {
            ScanState::Finished | ScanState::Aborted => cache::write_cache(&self.tree, path),
            _ => Err(self.reject("save a cache")),
        }
    }

    /// Drop the tree and return to `Idle`.
    pub fn clear(&mut self) -> Result<(), CoreError> {
        if self.state == ScanState::Scanning {
            return Err(self.reject("clear the controller"));
        }
        self.tree = FileTree::new();
        self.root_path = PathBuf::new();
        self.last_root = None;
        self.failure = None;
        self.last_duration = None;
        self.state = ScanState::Idle;
        Ok(())
    }

    fn begin(
        &mut self,
        source: ScanSource,
        path: PathBuf,
        operation: &'static str,
    ) -> Result<(), CoreError> {
        if self.state == ScanState::Scanning {
            return Err(self.reject(operation));
        }
        if source == ScanSource::Filesystem {
            self.config.exclude_rules()?;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (rx, thread) = spawn_worker(source, path.clone(), self.config.clone(), cancel.clone())?;

        info!("Session started ({source:?}) on {}", path.display());
        self.tree = FileTree::new();
        self.root_path = path.clone();
        self.last_root = match source {
            ScanSource::Filesystem => Some(path.clone()),
            ScanSource::Cache => None,
        };
        self.failure = None;
        self.last_duration = None;
        self.state = ScanState::Scanning;
        self.session = Some(ScanSession {
            source,
            target: path,
            cancel,
            rx,
            thread: Some(thread),
            started: Instant::now(),
        });
        Ok(())
    }

    fn reject(&self, operation: &'static str) -> CoreError {
        warn!("Rejected: {operation} while {}", self.state.label());
        CoreError::InvalidState {
            operation,
            state: self.state.label(),
        }
    }

    // ── Message pump ───────────────────────────────────────────

    /// Apply pending worker messages without blocking.
    ///
    /// Handles at most [`MAX_MESSAGES_PER_POLL`] messages per call and stops
    /// after a terminal event.
    pub fn process_messages(&mut self) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while events.len() < MAX_MESSAGES_PER_POLL {
            let Some(session) = self.session.as_ref() else {
                break;
            };
            let event = match session.rx.try_recv() {
                Ok(message) => self.apply(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.worker_lost(),
            };
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    /// Block until the session ends or `timeout` elapses, applying every
    /// message received in the meantime.
    pub fn wait(&mut self, timeout: Duration) -> Vec<ScanEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        loop {
            let Some(session) = self.session.as_ref() else {
                break;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match session.rx.recv_timeout(remaining) {
                Ok(message) => self.apply(message),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => self.worker_lost(),
            };
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    fn apply(&mut self, message: ScanMessage) -> ScanEvent {
        match message {
            ScanMessage::Started { path, source } => ScanEvent::Started { path, source },
            ScanMessage::Update(progress) => ScanEvent::Progress(progress),
            ScanMessage::EntryError { path, message } => ScanEvent::EntryError { path, message },
            ScanMessage::Complete { tree, duration } => {
                self.adopt(*tree);
                self.end_session(ScanState::Finished, duration);
                ScanEvent::Finished { duration }
            }
            ScanMessage::Cancelled { tree, duration } => {
                self.adopt(*tree);
                self.end_session(ScanState::Aborted, duration);
                ScanEvent::Aborted { duration }
            }
            ScanMessage::Failed { reason, duration } => {
                self.fail(reason.clone(), duration);
                ScanEvent::Failed { reason }
            }
        }
    }

    /// Take over a session's tree. Its recorded root replaces the path the
    /// session was started with, which for a load is the cache file.
    fn adopt(&mut self, tree: FileTree) {
        self.root_path = tree.root_path().to_path_buf();
        self.last_root = Some(self.root_path.clone());
        self.tree = tree;
    }

    fn worker_lost(&mut self) -> ScanEvent {
        let reason = "scan worker exited without reporting a result".to_string();
        warn!("{reason}");
        let elapsed = self
            .session
            .as_ref()
            .map(|s| s.started.elapsed())
            .unwrap_or_default();
        self.fail(reason.clone(), elapsed);
        ScanEvent::Failed { reason }
    }

    fn fail(&mut self, reason: String, duration: Duration) {
        self.tree = FileTree::failed(self.root_path.clone());
        self.failure = Some(reason);
        self.end_session(ScanState::Failed, duration);
    }

    fn end_session(&mut self, state: ScanState, duration: Duration) {
        if let Some(mut session) = self.session.take() {
            if let Some(thread) = session.thread.take() {
                // The worker has sent its last message and is about to return.
                if thread.join().is_err() {
                    warn!("Scan worker for {} panicked", session.target.display());
                }
            }
        }
        self.state = state;
        self.last_duration = Some(duration);
        info!(
            "Session on {} ended {} after {:?}",
            self.root_path.display(),
            state.label(),
            duration
        );
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// `true` while a session is running.
    pub fn is_busy(&self) -> bool {
        self.state == ScanState::Scanning
    }

    /// Root of the most recent tree. While a session runs, the path it was
    /// started with. Empty when idle.
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// The tree of the last session. Empty while scanning.
    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    /// Reason of the last failure, if the controller is in `Failed`.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn last_duration(&self) -> Option<Duration> {
        self.last_duration
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }
}

impl Drop for ScanController {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.cancel.store(true, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_rejects_abort_and_save() {
        let mut controller = ScanController::default();
        assert_eq!(controller.state(), ScanState::Idle);
        assert!(matches!(
            controller.abort_scan(),
            Err(CoreError::InvalidState { state: "idle", .. })
        ));
        assert!(matches!(
            controller.save_cache(Path::new("never-written.cache")),
            Err(CoreError::InvalidState { .. })
        ));
        assert!(controller.process_messages().is_empty());
        assert!(controller.wait(Duration::from_millis(10)).is_empty());
    }

    #[test]
    fn refresh_without_a_root_is_rejected() {
        let mut controller = ScanController::default();
        assert!(matches!(
            controller.refresh(),
            Err(CoreError::InvalidState { state: "idle", .. })
        ));
        assert_eq!(controller.state(), ScanState::Idle);
    }

    #[test]
    fn invalid_exclude_is_rejected_before_starting() {
        let config = ScanConfig {
            exclude: vec!["[".to_string()],
            ..ScanConfig::default()
        };
        let mut controller = ScanController::new(config);
        assert!(matches!(
            controller.start_scan("."),
            Err(CoreError::InvalidExclude { .. })
        ));
        assert_eq!(controller.state(), ScanState::Idle);
        assert!(!controller.is_busy());
    }

    #[test]
    fn clear_from_idle_is_allowed() {
        let mut controller = ScanController::default();
        controller.clear().unwrap();
        assert_eq!(controller.state(), ScanState::Idle);
        assert!(controller.tree().is_empty());
        assert_eq!(controller.root_path(), Path::new(""));
    }

    #[test]
    fn terminal_states() {
        assert!(!ScanState::Idle.is_terminal());
        assert!(!ScanState::Scanning.is_terminal());
        assert!(ScanState::Aborted.is_terminal());
        assert!(ScanEvent::Failed { reason: "x".into() }.is_terminal());
        assert!(!ScanEvent::Progress(ScanProgress::default()).is_terminal());
    }
}
