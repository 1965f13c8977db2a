//! Arena-backed file tree with O(depth) upward aggregate recomputation.
//!
//! All nodes live in a single `Vec<FileNode>`. Children are always inserted
//! after their parent, and both the walker and the cache reader insert in
//! depth-first order, finalizing a directory right after its last child.
use super::entry::{Aggregate, Entry, EntryKind, FileNode, NodeIndex};
use crate::error::CoreError;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_TREE_ID: AtomicU32 = AtomicU32::new(1);

fn next_tree_id() -> u32 {
    NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Outcome of the scan (or cache load) that produced a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanOutcome {
    NeverRun,
    InProgress,
    Finished,
    Aborted,
    Failed,
}

impl ScanOutcome {
    pub fn label(self) -> &'static str {
        match self {
            Self::NeverRun => "never run",
            Self::InProgress => "in progress",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }
}

/// Summary statistics for a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub total_size: u64,
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub broken_symlinks: u64,
    pub specials: u64,
    pub errors: u64,
    pub unreadable_bytes: u64,
    pub partial_dirs: u64,
    pub max_depth: u32,
}

/// The complete tree produced by one scan or cache load.
#[derive(Debug)]
pub struct FileTree {
    id: u32,
    nodes: Vec<FileNode>,
    root: Option<u32>,
    root_path: PathBuf,
    outcome: ScanOutcome,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTree {
    /// An empty tree that has never been populated.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty tree with pre-allocated arena capacity.
    pub fn with_capacity(estimated_nodes: usize) -> Self {
        Self {
            id: next_tree_id(),
            nodes: Vec::with_capacity(estimated_nodes),
            root: None,
            root_path: PathBuf::new(),
            outcome: ScanOutcome::NeverRun,
        }
    }

    /// An empty tree about to be populated for `root_path`.
    pub fn in_progress(root_path: impl Into<PathBuf>) -> Self {
        let mut tree = Self::new();
        tree.root_path = root_path.into();
        tree.outcome = ScanOutcome::InProgress;
        tree
    }

    /// An empty tree recording a failed attempt on `root_path`.
    pub fn failed(root_path: impl Into<PathBuf>) -> Self {
        let mut tree = Self::new();
        tree.root_path = root_path.into();
        tree.outcome = ScanOutcome::Failed;
        tree
    }

    /// Insert the root entry. A tree has exactly one root.
    pub fn insert_root(&mut self, entry: Entry) -> Result<NodeIndex, CoreError> {
        if self.root.is_some() {
            return Err(CoreError::InvalidState {
                operation: "insert a second root",
                state: "the tree already has a root",
            });
        }
        let slot = self.nodes.len();
        self.nodes.push(FileNode::new(entry, None));
        self.root = Some(slot as u32);
        Ok(NodeIndex::new(self.id, slot))
    }

    /// Append `entry` as the last child of `parent`.
    ///
    /// The new node's own aggregate is set; ancestors are *not* updated
    /// until [`recompute_aggregates`](Self::recompute_aggregates) or the
    /// parent is finalized.
    pub fn insert(&mut self, parent: NodeIndex, entry: Entry) -> Result<NodeIndex, CoreError> {
        let parent_slot = self.check(parent)?;
        if !self.nodes[parent_slot].is_dir() {
            return Err(CoreError::InvalidParent);
        }

        let slot = self.nodes.len();
        self.nodes.push(FileNode::new(entry, Some(parent_slot as u32)));

        let slot32 = slot as u32;
        match self.nodes[parent_slot].last_child {
            Some(last) => self.nodes[last as usize].next_sibling = Some(slot32),
            None => self.nodes[parent_slot].first_child = Some(slot32),
        }
        self.nodes[parent_slot].last_child = Some(slot32);

        Ok(NodeIndex::new(self.id, slot))
    }

    /// Recompute aggregates from `from` up to the root.
    ///
    /// Each ancestor is re-summed from its direct children, whose
    /// aggregates are assumed final. Cost is O(depth × fan-out), never
    /// O(subtree).
    pub fn recompute_aggregates(&mut self, from: NodeIndex) -> Result<(), CoreError> {
        let mut current = Some(self.check(from)?);
        while let Some(slot) = current {
            self.finalize_slot(slot);
            current = self.nodes[slot].parent.map(|p| p as usize);
        }
        Ok(())
    }

    /// Recompute a single node from its own entry and its direct children.
    pub(crate) fn finalize(&mut self, index: NodeIndex) {
        debug_assert_eq!(index.tree, self.id, "foreign NodeIndex");
        self.finalize_slot(index.idx());
    }

    fn finalize_slot(&mut self, slot: usize) {
        let mut aggregate = Aggregate::own(&self.nodes[slot].entry);
        let mut child = self.nodes[slot].first_child;
        while let Some(c) = child {
            let child_node = &self.nodes[c as usize];
            aggregate.absorb(child_node);
            child = child_node.next_sibling;
        }
        self.nodes[slot].aggregate = aggregate;
    }

    /// Release every node and return to the never-run state.
    ///
    /// Outstanding `NodeIndex` values become invalid.
    pub fn clear(&mut self) -> Result<(), CoreError> {
        if self.outcome == ScanOutcome::InProgress {
            return Err(CoreError::InvalidState {
                operation: "clear the tree",
                state: "a scan is populating it",
            });
        }
        self.nodes = Vec::new();
        self.root = None;
        self.root_path = PathBuf::new();
        self.outcome = ScanOutcome::NeverRun;
        self.id = next_tree_id();
        Ok(())
    }

    fn check(&self, index: NodeIndex) -> Result<usize, CoreError> {
        if index.tree != self.id || index.idx() >= self.nodes.len() {
            return Err(CoreError::InvalidParent);
        }
        Ok(index.idx())
    }

    fn index_of(&self, slot: u32) -> NodeIndex {
        NodeIndex::new(self.id, slot as usize)
    }

    // ── Lifecycle ──────────────────────────────────────────────

    pub fn outcome(&self) -> ScanOutcome {
        self.outcome
    }

    pub fn set_outcome(&mut self, outcome: ScanOutcome) {
        self.outcome = outcome;
    }

    /// Path that was scanned (or recorded in the cache file).
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// `true` if the aggregates do not cover the full subtree.
    pub fn is_partial(&self) -> bool {
        self.outcome == ScanOutcome::Aborted
            || self
                .root
                .is_some_and(|r| self.nodes[r as usize].entry.partial)
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn root(&self) -> Option<NodeIndex> {
        self.root.map(|r| self.index_of(r))
    }

    /// Get a node, or `None` for a reference from another tree.
    pub fn get(&self, index: NodeIndex) -> Option<&FileNode> {
        self.check(index).ok().map(|slot| &self.nodes[slot])
    }

    /// Get the node at the given index.
    ///
    /// Panics if `index` was not issued by this tree.
    #[inline]
    pub fn node(&self, index: NodeIndex) -> &FileNode {
        debug_assert_eq!(index.tree, self.id, "foreign NodeIndex");
        &self.nodes[index.idx()]
    }

    pub(crate) fn entry_mut(&mut self, index: NodeIndex) -> &mut Entry {
        debug_assert_eq!(index.tree, self.id, "foreign NodeIndex");
        &mut self.nodes[index.idx()].entry
    }

    pub fn parent(&self, index: NodeIndex) -> Option<NodeIndex> {
        self.get(index)
            .and_then(|n| n.parent)
            .map(|p| self.index_of(p))
    }

    /// Direct children in insertion order.
    pub fn children(&self, parent: NodeIndex) -> Children<'_> {
        Children {
            tree: self,
            next: self.get(parent).and_then(|n| n.first_child),
        }
    }

    /// Direct children, directories first, then by size descending.
    pub fn children_sorted_by_size(&self, parent: NodeIndex) -> Vec<NodeIndex> {
        let mut children: Vec<NodeIndex> = self.children(parent).collect();
        children.sort_unstable_by(|a, b| {
            let a_node = self.node(*a);
            let b_node = self.node(*b);
            b_node
                .is_dir()
                .cmp(&a_node.is_dir())
                .then(b_node.size().cmp(&a_node.size()))
                .then_with(|| a_node.name().cmp(b_node.name()))
        });
        children
    }

    /// Every node with its reference, in arena (depth-first insertion) order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &FileNode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(slot, node)| (NodeIndex::new(self.id, slot), node))
    }

    /// Raw arena slice, for bulk read-only passes.
    pub fn nodes(&self) -> &[FileNode] {
        &self.nodes
    }

    /// Reference for a position in [`nodes`](Self::nodes).
    pub fn index_at(&self, slot: usize) -> Option<NodeIndex> {
        (slot < self.nodes.len()).then(|| NodeIndex::new(self.id, slot))
    }

    /// Reconstruct the full path for a node from the scanned root path.
    pub fn full_path(&self, index: NodeIndex) -> PathBuf {
        let mut segments = Vec::new();
        let mut current = self.get(index).map(|_| index.slot);
        while let Some(slot) = current {
            let node = &self.nodes[slot as usize];
            match node.parent {
                Some(_) => segments.push(node.entry.os_name()),
                None if self.root_path.as_os_str().is_empty() => {
                    segments.push(node.entry.os_name())
                }
                None => {}
            }
            current = node.parent;
        }

        let mut path = self.root_path.clone();
        for segment in segments.iter().rev() {
            path.push(segment);
        }
        path
    }

    /// Look up a node by its full path (or a path relative to the root).
    pub fn find(&self, path: &Path) -> Option<NodeIndex> {
        let relative = path.strip_prefix(&self.root_path).unwrap_or(path);
        let mut current = self.root()?;
        for component in relative.components() {
            let name = match component {
                Component::Normal(name) => name,
                Component::CurDir => continue,
                _ => return None,
            };
            current = self
                .children(current)
                .find(|&c| self.node(c).entry.os_name() == name)?;
        }
        Some(current)
    }

    /// Total number of nodes in the tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the tree contains no nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Aggregate size of the root, 0 for an empty tree.
    pub fn total_size(&self) -> u64 {
        self.root
            .map(|r| self.nodes[r as usize].aggregate.size)
            .unwrap_or(0)
    }

    /// Summary statistics in one depth-first pass.
    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            total_size: self.total_size(),
            ..TreeStats::default()
        };
        let Some(root) = self.root else {
            return stats;
        };

        let mut stack: Vec<(u32, u32)> = vec![(root, 0)];
        while let Some((slot, depth)) = stack.pop() {
            let node = &self.nodes[slot as usize];
            stats.max_depth = stats.max_depth.max(depth);
            match &node.entry.kind {
                EntryKind::File => stats.files += 1,
                EntryKind::Directory { .. } => stats.dirs += 1,
                EntryKind::Symlink { broken, .. } => {
                    stats.symlinks += 1;
                    stats.broken_symlinks += u64::from(*broken);
                }
                EntryKind::Special => stats.specials += 1,
            }
            stats.errors += u64::from(node.entry.error);
            stats.unreadable_bytes += node.entry.unreadable_bytes;
            stats.partial_dirs += u64::from(node.entry.partial);

            let mut child = node.first_child;
            while let Some(c) = child {
                stack.push((c, depth + 1));
                child = self.nodes[c as usize].next_sibling;
            }
        }
        stats
    }
}

/// Iterator over the direct children of a node.
pub struct Children<'a> {
    tree: &'a FileTree,
    next: Option<u32>,
}

impl Iterator for Children<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        let slot = self.next?;
        self.next = self.tree.nodes[slot as usize].next_sibling;
        Some(self.tree.index_of(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root -> (a.txt: 100, sub -> (b: 50, c: 50))
    fn sample_tree() -> (FileTree, NodeIndex, NodeIndex) {
        let mut tree = FileTree::in_progress("/data");
        let root = tree.insert_root(Entry::directory("data", 0)).unwrap();
        tree.insert(root, Entry::file("a.txt", 100, 0)).unwrap();
        let sub = tree.insert(root, Entry::directory("sub", 0)).unwrap();
        tree.insert(sub, Entry::file("b", 50, 0)).unwrap();
        let c = tree.insert(sub, Entry::file("c", 50, 0)).unwrap();
        tree.recompute_aggregates(c).unwrap();
        tree.set_outcome(ScanOutcome::Finished);
        (tree, root, sub)
    }

    #[test]
    fn test_tree_aggregation() {
        let (tree, root, sub) = sample_tree();
        assert_eq!(tree.node(sub).size(), 100);
        assert_eq!(tree.node(root).size(), 200);
        assert_eq!(tree.node(root).aggregate.items, 4);
        assert_eq!(tree.node(root).aggregate.files, 3);
        assert_eq!(tree.node(root).aggregate.dirs, 1);
        assert_eq!(tree.total_size(), 200);
    }

    #[test]
    fn recompute_is_idempotent() {
        let (mut tree, root, sub) = sample_tree();
        tree.recompute_aggregates(sub).unwrap();
        tree.recompute_aggregates(sub).unwrap();
        assert_eq!(tree.node(root).size(), 200);
    }

    #[test]
    fn insert_under_file_is_invalid_parent() {
        let (mut tree, root, _) = sample_tree();
        let file = tree.children(root).next().unwrap();
        let err = tree.insert(file, Entry::file("x", 1, 0)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParent));
    }

    #[test]
    fn foreign_reference_is_invalid_parent() {
        let (mut tree, _, _) = sample_tree();
        let mut other = FileTree::in_progress("/other");
        let other_root = other.insert_root(Entry::directory("other", 0)).unwrap();

        let err = tree.insert(other_root, Entry::file("x", 1, 0)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParent));
        assert!(tree.get(other_root).is_none());
    }

    #[test]
    fn second_root_is_rejected() {
        let (mut tree, _, _) = sample_tree();
        let err = tree.insert_root(Entry::directory("again", 0)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[test]
    fn clear_resets_and_invalidates_references() {
        let (mut tree, root, _) = sample_tree();
        tree.clear().unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.outcome(), ScanOutcome::NeverRun);
        assert_eq!(tree.root(), None);
        assert!(tree.get(root).is_none());
        assert!(matches!(
            tree.recompute_aggregates(root),
            Err(CoreError::InvalidParent)
        ));
    }

    #[test]
    fn clear_during_scan_is_invalid_state() {
        let mut tree = FileTree::in_progress("/data");
        let err = tree.clear().unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[test]
    fn test_full_path_and_find() {
        let (tree, root, sub) = sample_tree();
        let c = tree.children(sub).nth(1).unwrap();
        assert_eq!(tree.full_path(c), PathBuf::from("/data/sub/c"));
        assert_eq!(tree.full_path(root), PathBuf::from("/data"));
        assert_eq!(tree.find(Path::new("/data/sub/c")), Some(c));
        assert_eq!(tree.find(Path::new("sub")), Some(sub));
        assert_eq!(tree.find(Path::new("/data/missing")), None);
    }

    #[test]
    fn test_children_sorted() {
        let mut tree = FileTree::in_progress("/r");
        let root = tree.insert_root(Entry::directory("r", 0)).unwrap();
        let small = tree.insert(root, Entry::file("small.txt", 10, 0)).unwrap();
        let big = tree.insert(root, Entry::file("big.bin", 1000, 0)).unwrap();
        let dir = tree.insert(root, Entry::directory("folder", 0)).unwrap();
        tree.recompute_aggregates(dir).unwrap();

        let sorted = tree.children_sorted_by_size(root);
        assert_eq!(sorted, vec![dir, big, small]);
    }

    #[test]
    fn stats_count_kinds_and_depth() {
        let (mut tree, root, sub) = sample_tree();
        tree.insert(root, Entry::symlink("ln", 3, 0, "nowhere", true))
            .unwrap();
        tree.insert(sub, Entry::unreadable("locked", EntryKind::File))
            .unwrap();
        tree.recompute_aggregates(sub).unwrap();

        let stats = tree.stats();
        assert_eq!(stats.files, 4);
        assert_eq!(stats.dirs, 2);
        assert_eq!(stats.symlinks, 1);
        assert_eq!(stats.broken_symlinks, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.total_size, 203);
        assert_eq!(tree.node(root).aggregate.errors, 1);
    }

    #[test]
    fn aborted_tree_is_partial() {
        let (mut tree, _, _) = sample_tree();
        assert!(!tree.is_partial());
        tree.set_outcome(ScanOutcome::Aborted);
        assert!(tree.is_partial());
    }
}
