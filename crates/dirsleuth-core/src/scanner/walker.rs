//! Depth-first filesystem walker built on `jwalk`.
//!
//! `jwalk` delivers entries in depth-first pre-order while reading ahead on
//! a rayon pool. A stack of open directories turns that stream into
//! post-order aggregation: when an entry at depth *d* arrives, every open
//! directory at depth ≥ *d* has seen its last child and is finalized on the
//! spot, so each directory's aggregate is computed exactly once.
//!
//! Symlinks are recorded, never followed. Per-entry failures become flagged
//! entries and the walk carries on; only an unreadable root fails the walk.
//! Entries matching an exclude rule are left out of the tree altogether.
use crate::config::{ExcludeRules, ScanConfig};
use crate::error::CoreError;
use crate::model::{Entry, EntryKind, FileTree, NodeIndex, ScanOutcome};
use crate::scanner::progress::{ProgressThrottle, ScanProgress};
use compact_str::CompactString;
use jwalk::{Parallelism, WalkDirGeneric};
use std::ffi::OsStr;
use std::fs::{self, FileType, Metadata};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// Receives walk notifications. Every hook defaults to a no-op.
pub trait WalkVisitor {
    /// Called once per inserted entry, the root included, after it has been
    /// linked to its parent.
    fn entry(&mut self, _tree: &FileTree, _index: NodeIndex) {}

    /// Called at most once per configured progress interval.
    fn progress(&mut self, _progress: &ScanProgress) {}

    /// Called once per absorbed per-entry error.
    fn entry_error(&mut self, _path: &Path, _message: &str) {}
}

impl WalkVisitor for () {}

/// Per-entry client state: `true` marks a directory pruned as a mount point.
type ClientState = ((), bool);

/// A directory whose children are still arriving.
struct OpenDir {
    index: NodeIndex,
    depth: usize,
    path: PathBuf,
}

/// Walk `root_path` and build a tree of everything below it.
///
/// Returns a tree whose outcome is `Finished`, or `Aborted` if `cancel` was
/// observed. The flag is checked before every entry, which covers both
/// descending into a directory and moving on to the next sibling.
pub fn walk<V: WalkVisitor>(
    root_path: &Path,
    config: &ScanConfig,
    cancel: &AtomicBool,
    visitor: &mut V,
) -> Result<FileTree, CoreError> {
    let start = Instant::now();
    let unreadable = |source| CoreError::RootUnreadable {
        path: root_path.to_path_buf(),
        source,
    };

    let rules = config.exclude_rules()?;
    let root = root_path.canonicalize().map_err(unreadable)?;
    let root_meta = fs::symlink_metadata(&root).map_err(unreadable)?;
    let root_name = root_display_name(&root);
    let mut tree = FileTree::in_progress(&root);
    let mut progress = ProgressThrottle::new(config.progress_interval());

    if !root_meta.is_dir() {
        let index = tree.insert_root(entry_from_metadata(&root_name, &root, &root_meta))?;
        visitor.entry(&tree, index);
        tree.set_outcome(ScanOutcome::Finished);
        return Ok(tree);
    }

    // A root we cannot list is a failed scan, not an error entry.
    fs::read_dir(&root).map_err(unreadable)?;

    info!("Walking {}", root.display());
    let root_entry = Entry::directory(root_name.as_str(), mtime_of(&root_meta));
    let root_index = tree.insert_root(root_entry)?;
    visitor.entry(&tree, root_index);
    progress.record_entry(0);

    let mut open = vec![OpenDir {
        index: root_index,
        depth: 0,
        path: root.clone(),
    }];

    for result in build_walker(&root, config, rules, device_of(&root_meta)) {
        if cancel.load(Ordering::Relaxed) {
            abort(&mut tree, &mut open);
            info!(
                "Walk of {} aborted after {} entries in {:?}",
                root.display(),
                tree.len(),
                start.elapsed()
            );
            return Ok(tree);
        }

        match result {
            Ok(dir_entry) => {
                if dir_entry.depth == 0 {
                    continue;
                }
                close_until(&mut tree, &mut open, |dir| dir.depth < dir_entry.depth);
                let Some(parent) = open.last().map(|dir| dir.index) else {
                    break;
                };

                let path = dir_entry.path();
                let file_name = dir_entry.file_name();
                let name = file_name.to_string_lossy();
                let mut entry = match fs::symlink_metadata(&path) {
                    Ok(meta) => entry_from_metadata(&name, &path, &meta),
                    Err(err) => {
                        report_error(visitor, &mut progress, &path, &err.to_string());
                        Entry::unreadable(&*name, kind_from_file_type(dir_entry.file_type()))
                    }
                }
                .with_os_name(file_name);
                if dir_entry.client_state && entry.kind.is_dir() {
                    entry.kind = EntryKind::Directory { mount_point: true };
                }
                let is_dir = entry.kind.is_dir();
                let size = if entry.error { 0 } else { entry.size };

                let index = tree.insert(parent, entry)?;
                visitor.entry(&tree, index);
                progress.record_entry(size);

                if is_dir {
                    if let Some(err) = &dir_entry.read_children_error {
                        let message = err.to_string();
                        mark_unlistable(&mut tree, index, visitor, &mut progress, &path, &message);
                    }
                    open.push(OpenDir {
                        index,
                        depth: dir_entry.depth,
                        path,
                    });
                }
            }
            Err(err) => {
                let message = err.to_string();
                match err.path() {
                    Some(path) => {
                        absorb_walk_error(&mut tree, &mut open, visitor, &mut progress, path, &message)?
                    }
                    None => {
                        warn!("Walk error without a path under {}: {message}", root.display());
                        progress.record_error();
                        visitor.entry_error(&root, &message);
                    }
                }
            }
        }

        if let Some(snapshot) = open.last().and_then(|dir| progress.poll(&dir.path)) {
            visitor.progress(&snapshot);
        }
    }

    close_until(&mut tree, &mut open, |_| false);
    tree.set_outcome(ScanOutcome::Finished);
    debug!(
        "Walk of {} complete: {} entries, {} bytes in {:?}",
        root.display(),
        tree.len(),
        tree.total_size(),
        start.elapsed()
    );
    Ok(tree)
}

fn build_walker(
    root: &Path,
    config: &ScanConfig,
    rules: ExcludeRules,
    root_device: Option<u64>,
) -> WalkDirGeneric<ClientState> {
    let walker = WalkDirGeneric::<ClientState>::new(root)
        .skip_hidden(false)
        .follow_links(false)
        .sort(config.sort_entries)
        .parallelism(Parallelism::RayonNewPool(config.effective_threads()));

    let mount_device = root_device.filter(|_| !config.cross_filesystems);
    if rules.is_empty() && mount_device.is_none() {
        return walker;
    }

    walker.process_read_dir(move |depth, _path, _state, children| {
        // `None` is the synthetic listing holding the root itself.
        if depth.is_some() && !rules.is_empty() {
            children.retain(|child| match child {
                Ok(child) if rules.is_excluded(&child.path()) => {
                    debug!("Excluding {}", child.path().display());
                    false
                }
                _ => true,
            });
        }

        let Some(device) = mount_device else {
            return;
        };
        for child in children.iter_mut().flatten() {
            if !child.file_type.is_dir() {
                continue;
            }
            let Ok(meta) = child.metadata() else {
                continue;
            };
            if device_of(&meta) != Some(device) {
                child.read_children_path = None;
                child.client_state = true;
            }
        }
    })
}

/// Pop and finalize open directories until `keep` accepts the top one.
/// The root is only popped when `keep` rejects everything.
fn close_until(tree: &mut FileTree, open: &mut Vec<OpenDir>, keep: impl Fn(&OpenDir) -> bool) {
    while let Some(top) = open.last() {
        if keep(top) {
            break;
        }
        tree.finalize(top.index);
        open.pop();
    }
}

/// Flag every open directory as partial, innermost first, so each ancestor
/// sums children that are already final.
fn abort(tree: &mut FileTree, open: &mut Vec<OpenDir>) {
    while let Some(dir) = open.pop() {
        tree.entry_mut(dir.index).partial = true;
        tree.finalize(dir.index);
    }
    tree.set_outcome(ScanOutcome::Aborted);
}

/// Handle an `Err` item from the walker.
///
/// Listing failures name the directory itself, which is normally still open;
/// anything else becomes an error placeholder under its parent.
fn absorb_walk_error<V: WalkVisitor>(
    tree: &mut FileTree,
    open: &mut Vec<OpenDir>,
    visitor: &mut V,
    progress: &mut ProgressThrottle,
    path: &Path,
    message: &str,
) -> Result<(), CoreError> {
    if let Some(dir) = open.iter().rev().find(|dir| dir.path == path) {
        let index = dir.index;
        mark_unlistable(tree, index, visitor, progress, path, message);
        return Ok(());
    }

    let parent_pos = path
        .parent()
        .and_then(|parent| open.iter().rposition(|dir| dir.path == parent));
    let Some(parent_pos) = parent_pos else {
        warn!("Dropping walk error for {} (parent not open): {message}", path.display());
        report_error(visitor, progress, path, message);
        return Ok(());
    };

    while open.len() > parent_pos + 1 {
        if let Some(dir) = open.pop() {
            tree.finalize(dir.index);
        }
    }
    let os_name = path.file_name().unwrap_or(OsStr::new("<unreadable>"));
    let name = os_name.to_string_lossy();
    let kind = EntryKind::Directory { mount_point: false };
    let entry = Entry::unreadable(&*name, kind).with_os_name(os_name);
    let index = tree.insert(open[parent_pos].index, entry)?;
    visitor.entry(tree, index);
    report_error(visitor, progress, path, message);
    Ok(())
}

/// Set the error flag on a directory whose listing failed (once).
fn mark_unlistable<V: WalkVisitor>(
    tree: &mut FileTree,
    index: NodeIndex,
    visitor: &mut V,
    progress: &mut ProgressThrottle,
    path: &Path,
    message: &str,
) {
    let entry = tree.entry_mut(index);
    if entry.error {
        return;
    }
    entry.error = true;
    report_error(visitor, progress, path, message);
}

fn report_error<V: WalkVisitor>(
    visitor: &mut V,
    progress: &mut ProgressThrottle,
    path: &Path,
    message: &str,
) {
    debug!("Skipping {}: {message}", path.display());
    progress.record_error();
    visitor.entry_error(path, message);
}

/// Classify an entry from its `lstat` metadata.
fn entry_from_metadata(name: &str, path: &Path, meta: &Metadata) -> Entry {
    let file_type = meta.file_type();
    let mtime = mtime_of(meta);

    if file_type.is_dir() {
        Entry::directory(name, mtime)
    } else if file_type.is_file() {
        Entry::file(name, meta.len(), mtime)
    } else if file_type.is_symlink() {
        match fs::read_link(path) {
            Ok(target) => {
                let broken = fs::metadata(path).is_err();
                let target = CompactString::new(target.to_string_lossy());
                Entry::symlink(name, meta.len(), mtime, target, broken)
            }
            Err(_) => unreadable_link(name, meta.len(), mtime),
        }
    } else {
        Entry::special(name, meta.len(), mtime)
    }
}

/// A symlink whose target could not be read. Its `lstat` size is kept as an
/// unreadable estimate rather than counted.
fn unreadable_link(name: &str, lstat_size: u64, mtime: i64) -> Entry {
    let mut entry = Entry::symlink(name, 0, mtime, "", true).with_error(true);
    entry.unreadable_bytes = lstat_size;
    entry
}

/// Best guess at an entry's kind when `lstat` failed.
fn kind_from_file_type(file_type: FileType) -> EntryKind {
    if file_type.is_dir() {
        EntryKind::Directory { mount_point: false }
    } else if file_type.is_file() {
        EntryKind::File
    } else if file_type.is_symlink() {
        EntryKind::Symlink {
            target: CompactString::default(),
            broken: true,
        }
    } else {
        EntryKind::Special
    }
}

fn mtime_of(meta: &Metadata) -> i64 {
    match meta.modified() {
        Ok(time) => match time.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        },
        Err(_) => 0,
    }
}

#[cfg(unix)]
fn device_of(meta: &Metadata) -> Option<u64> {
    Some(meta.dev())
}

#[cfg(not(unix))]
fn device_of(_meta: &Metadata) -> Option<u64> {
    None
}

/// Derive a display name for the scan root: its last segment, or the whole
/// path for filesystem roots such as `/`.
fn root_display_name(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => path.to_string_lossy().into_owned(),
    }
}
