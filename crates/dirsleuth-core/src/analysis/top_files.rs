//! Top-N largest files.
//!
//! Candidates are collected from the arena in parallel with rayon; only the
//! N winners pay for path reconstruction.
use crate::model::{EntryKind, FileTree, NodeIndex};
use rayon::prelude::*;
use std::path::PathBuf;

/// A single entry in the "largest files" results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargestFile {
    pub index: NodeIndex,
    /// Full path (reconstructed).
    pub path: PathBuf,
    pub size: u64,
}

/// The `n` largest regular files in `tree`, largest first.
///
/// Ties are broken by arena order so repeated calls agree.
pub fn top_files(tree: &FileTree, n: usize) -> Vec<LargestFile> {
    if n == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<(u64, usize)> = tree
        .nodes()
        .par_iter()
        .enumerate()
        .filter(|(_, node)| matches!(node.entry.kind, EntryKind::File) && !node.entry.error)
        .map(|(slot, node)| (node.entry.size, slot))
        .collect();

    let by_size_desc = |a: &(u64, usize), b: &(u64, usize)| b.0.cmp(&a.0).then(a.1.cmp(&b.1));
    if candidates.len() > n {
        candidates.select_nth_unstable_by(n - 1, by_size_desc);
        candidates.truncate(n);
    }
    candidates.sort_unstable_by(by_size_desc);

    candidates
        .into_iter()
        .filter_map(|(size, slot)| {
            let index = tree.index_at(slot)?;
            Some(LargestFile {
                index,
                path: tree.full_path(index),
                size,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entry, ScanOutcome};

    #[test]
    fn picks_largest_files_in_order() {
        let mut tree = FileTree::in_progress("/r");
        let root = tree.insert_root(Entry::directory("r", 0)).unwrap();
        tree.insert(root, Entry::file("small", 10, 0)).unwrap();
        let sub = tree.insert(root, Entry::directory("sub", 0)).unwrap();
        tree.insert(sub, Entry::file("huge", 1_000, 0)).unwrap();
        tree.insert(sub, Entry::file("mid", 500, 0)).unwrap();
        tree.insert(root, Entry::symlink("link", 9_999, 0, "huge", false))
            .unwrap();
        tree.set_outcome(ScanOutcome::Finished);

        let top = top_files(&tree, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].size, 1_000);
        assert_eq!(top[0].path, PathBuf::from("/r/sub/huge"));
        assert_eq!(top[1].size, 500);

        assert_eq!(top_files(&tree, 10).len(), 3);
        assert!(top_files(&tree, 0).is_empty());
    }
}
