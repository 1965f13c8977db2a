//! End-to-end walker tests.
//!
//! These run `walker::walk` against real temporary directories built with
//! `tempfile`, covering enumeration, post-order aggregation, progress
//! throttling and cancellation without any filesystem mocking.
use dirsleuth_core::model::{FileTree, NodeIndex, ScanOutcome};
use dirsleuth_core::scanner::progress::ScanProgress;
use dirsleuth_core::scanner::walker::{walk, WalkVisitor};
use dirsleuth_core::ScanConfig;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// ```text
/// root/
///   alpha/
///     a.txt   (100 bytes)
///     b.rs    (200 bytes)
///   beta/
///     c.png   (300 bytes)
///   d.zip     (400 bytes)
/// ```
///
/// Total file bytes: 1 000.
fn build_test_tree(root: &Path) {
    let alpha = root.join("alpha");
    let beta = root.join("beta");
    fs::create_dir_all(&alpha).unwrap();
    fs::create_dir_all(&beta).unwrap();

    write_bytes(&alpha.join("a.txt"), 100);
    write_bytes(&alpha.join("b.rs"), 200);
    write_bytes(&beta.join("c.png"), 300);
    write_bytes(&root.join("d.zip"), 400);
}

fn write_bytes(path: &Path, n: usize) {
    let mut f = fs::File::create(path).unwrap();
    f.write_all(&vec![0u8; n]).unwrap();
}

fn scan(path: &Path) -> FileTree {
    let cancel = AtomicBool::new(false);
    walk(path, &ScanConfig::default(), &cancel, &mut ()).expect("walk failed")
}

/// Every directory's size must equal its own size plus its children's.
fn assert_aggregates_consistent(tree: &FileTree) {
    for (index, node) in tree.iter() {
        if !node.is_dir() {
            continue;
        }
        let children: u64 = tree.children(index).map(|c| tree.node(c).size()).sum();
        assert_eq!(
            node.size(),
            node.entry.size + children,
            "inconsistent aggregate at {}",
            tree.full_path(index).display()
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn scan_discovers_all_files() {
    let tmp = TempDir::new().expect("failed to create temp dir");
    build_test_tree(tmp.path());

    let tree = scan(tmp.path());

    // 1 root + 2 dirs + 4 files.
    assert_eq!(tree.len(), 7);
    assert_eq!(tree.total_size(), 1_000);
    assert_eq!(tree.outcome(), ScanOutcome::Finished);
    assert!(!tree.is_partial());

    let stats = tree.stats();
    assert_eq!(stats.files, 4);
    assert_eq!(stats.dirs, 3);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.max_depth, 2);

    let alpha = tree.find(Path::new("alpha")).unwrap();
    assert_eq!(tree.node(alpha).size(), 300);
    assert_eq!(tree.node(alpha).aggregate.files, 2);
    assert_aggregates_consistent(&tree);
}

#[test]
fn scan_example_sizes() {
    let tmp = TempDir::new().unwrap();
    write_bytes(&tmp.path().join("one.bin"), 100);
    fs::create_dir(tmp.path().join("sub")).unwrap();
    write_bytes(&tmp.path().join("sub").join("x"), 50);
    write_bytes(&tmp.path().join("sub").join("y"), 50);

    let tree = scan(tmp.path());
    let root = tree.root().unwrap();
    let sub = tree.find(Path::new("sub")).unwrap();
    assert_eq!(tree.node(root).size(), 200);
    assert_eq!(tree.node(sub).size(), 100);
}

#[test]
fn scan_records_canonical_root_path() {
    let tmp = TempDir::new().unwrap();
    build_test_tree(tmp.path());

    let tree = scan(&tmp.path().join("alpha").join(".."));
    assert_eq!(tree.root_path(), tmp.path().canonicalize().unwrap());
    let c = tree.find(Path::new("beta/c.png")).unwrap();
    assert_eq!(
        tree.full_path(c),
        tmp.path().canonicalize().unwrap().join("beta").join("c.png")
    );
}

#[test]
fn scan_empty_directory() {
    let tmp = TempDir::new().expect("failed to create temp dir");

    let tree = scan(tmp.path());
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.total_size(), 0);
    assert!(tree.node(tree.root().unwrap()).is_dir());
}

#[test]
fn sorted_scans_are_reproducible() {
    let tmp = TempDir::new().unwrap();
    build_test_tree(tmp.path());
    for i in 0..20 {
        write_bytes(&tmp.path().join(format!("n{i:02}")), i);
    }

    let names = |tree: &FileTree| -> Vec<PathBuf> {
        tree.iter().map(|(index, _)| tree.full_path(index)).collect()
    };
    assert_eq!(names(&scan(tmp.path())), names(&scan(tmp.path())));
}

/// With a zero interval, progress fires once per clock stride.
#[test]
fn scan_sends_progress_updates() {
    #[derive(Default)]
    struct Collect(Vec<ScanProgress>);
    impl WalkVisitor for Collect {
        fn progress(&mut self, progress: &ScanProgress) {
            self.0.push(progress.clone());
        }
    }

    let tmp = TempDir::new().unwrap();
    for i in 0..300 {
        write_bytes(&tmp.path().join(format!("file{i:03}.bin")), 10);
    }
    let config = ScanConfig {
        progress_interval_ms: 0,
        ..ScanConfig::default()
    };
    let cancel = AtomicBool::new(false);
    let mut collect = Collect::default();
    let tree = walk(tmp.path(), &config, &cancel, &mut collect).unwrap();

    assert!(!collect.0.is_empty(), "expected at least one progress update");
    let mut last = 0;
    for update in &collect.0 {
        assert!(update.entries_visited > last, "counters must grow");
        assert!(update.entries_visited <= tree.len() as u64);
        assert_eq!(update.errors, 0);
        last = update.entries_visited;
    }
    assert_eq!(
        collect.0.last().unwrap().current_path,
        tmp.path().canonicalize().unwrap()
    );
}

/// Setting the flag mid-walk stops within one entry and leaves a
/// consistent, partial tree.
#[test]
fn cancellation_stops_within_bounded_entries() {
    struct CancelAfter<'a> {
        seen: usize,
        limit: usize,
        cancel: &'a AtomicBool,
    }
    impl WalkVisitor for CancelAfter<'_> {
        fn entry(&mut self, _tree: &FileTree, _index: NodeIndex) {
            self.seen += 1;
            if self.seen == self.limit {
                self.cancel.store(true, Ordering::Relaxed);
            }
        }
    }

    let tmp = TempDir::new().unwrap();
    for d in 0..5 {
        let dir = tmp.path().join(format!("dir{d}"));
        fs::create_dir(&dir).unwrap();
        for f in 0..20 {
            write_bytes(&dir.join(format!("f{f:02}")), 10);
        }
    }

    let cancel = AtomicBool::new(false);
    let mut visitor = CancelAfter {
        seen: 0,
        limit: 30,
        cancel: &cancel,
    };
    let tree = walk(tmp.path(), &ScanConfig::default(), &cancel, &mut visitor).unwrap();

    assert_eq!(tree.outcome(), ScanOutcome::Aborted);
    assert_eq!(tree.len(), 30);
    assert!(tree.is_partial());

    let root = tree.root().unwrap();
    assert!(tree.node(root).entry.partial);
    // dir0 was complete before the abort; dir1 was still open.
    let dir0 = tree.find(Path::new("dir0")).unwrap();
    let dir1 = tree.find(Path::new("dir1")).unwrap();
    assert!(!tree.node(dir0).entry.partial);
    assert!(tree.node(dir1).entry.partial);
    assert_eq!(tree.node(dir0).size(), 200);
    assert_aggregates_consistent(&tree);
}

#[test]
fn missing_root_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let cancel = AtomicBool::new(false);
    let result = walk(
        &tmp.path().join("does-not-exist"),
        &ScanConfig::default(),
        &cancel,
        &mut (),
    );
    assert!(matches!(
        result,
        Err(dirsleuth_core::CoreError::RootUnreadable { .. })
    ));
}

#[cfg(unix)]
#[test]
fn unreadable_directory_is_flagged_not_fatal() {
    use std::os::unix::fs::PermissionsExt;

    #[derive(Default)]
    struct Errors(Vec<PathBuf>);
    impl WalkVisitor for Errors {
        fn entry_error(&mut self, path: &Path, _message: &str) {
            self.0.push(path.to_path_buf());
        }
    }

    let tmp = TempDir::new().unwrap();
    build_test_tree(tmp.path());
    let locked = tmp.path().join("locked");
    fs::create_dir(&locked).unwrap();
    write_bytes(&locked.join("hidden"), 999);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users can list the directory anyway.
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let cancel = AtomicBool::new(false);
    let mut errors = Errors::default();
    let tree = walk(tmp.path(), &ScanConfig::default(), &cancel, &mut errors).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(tree.outcome(), ScanOutcome::Finished);
    let node = tree.find(Path::new("locked")).unwrap();
    assert!(tree.node(node).entry.error);
    assert!(!tree.node(node).has_children());
    // Siblings are still fully counted.
    assert_eq!(tree.total_size(), 1_000);
    assert_eq!(tree.node(tree.root().unwrap()).aggregate.errors, 1);
    assert_eq!(errors.0.len(), 1);
}
