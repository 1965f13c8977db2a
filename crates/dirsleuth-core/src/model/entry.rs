//! A single node in the arena-allocated file tree.
//!
//! Nodes are stored in a flat `Vec<FileNode>` for cache-friendly traversal.
//! Parent-child relationships use slot numbers rather than pointers, so the
//! tree has no reference cycles and can be walked without recursion.
use compact_str::CompactString;
use std::ffi::{OsStr, OsString};

/// Reference to a node inside one particular [`FileTree`](super::FileTree).
///
/// Carries the id of the tree that issued it, so a reference from another
/// tree (or from before a `clear`) is detected instead of silently indexing
/// the wrong node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex {
    pub(crate) tree: u32,
    pub(crate) slot: u32,
}

impl NodeIndex {
    #[inline]
    pub(crate) fn new(tree: u32, slot: usize) -> Self {
        debug_assert!(slot <= u32::MAX as usize, "NodeIndex overflow");
        Self {
            tree,
            slot: slot as u32,
        }
    }

    /// Position of the node in its tree's arena.
    #[inline]
    pub fn idx(self) -> usize {
        self.slot as usize
    }
}

/// Filesystem object type. Closed set: every consumer matches exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory. `mount_point` is set when the directory lives on another
    /// filesystem and was deliberately not descended.
    Directory { mount_point: bool },
    /// Symbolic link, never followed.
    Symlink {
        target: CompactString,
        broken: bool,
    },
    /// Sockets, FIFOs, device nodes, and anything else.
    Special,
}

impl EntryKind {
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink { .. })
    }

    /// Short label used in listings and exports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory { .. } => "dir",
            Self::Symlink { .. } => "symlink",
            Self::Special => "special",
        }
    }
}

/// What was observed about one filesystem object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Path segment only. Full paths are rebuilt by walking up the tree.
    /// Lossy when the on-disk name is not valid UTF-8; see `raw_name`.
    pub name: CompactString,

    /// The on-disk name, kept only when it is not valid UTF-8.
    pub raw_name: Option<OsString>,

    pub kind: EntryKind,

    /// Own size in bytes. Always 0 for directories produced by a live scan.
    pub size: u64,

    /// Modification time in whole seconds since the Unix epoch.
    pub mtime: i64,

    /// `true` if the entry could not be stat'ed or (for a directory) listed.
    /// The entry stays in the tree so users can see where errors occurred.
    pub error: bool,

    /// `true` if the scan was aborted while this directory was still open,
    /// i.e. its aggregates only cover the children visited before the abort.
    pub partial: bool,

    /// Estimate of bytes that could not be accounted for because of `error`.
    /// 0 when unknown. Never folded into `size`.
    pub unreadable_bytes: u64,
}

impl Entry {
    fn new(name: impl Into<CompactString>, kind: EntryKind, size: u64, mtime: i64) -> Self {
        Self {
            name: name.into(),
            raw_name: None,
            kind,
            size,
            mtime,
            error: false,
            partial: false,
            unreadable_bytes: 0,
        }
    }

    pub fn file(name: impl Into<CompactString>, size: u64, mtime: i64) -> Self {
        Self::new(name, EntryKind::File, size, mtime)
    }

    pub fn directory(name: impl Into<CompactString>, mtime: i64) -> Self {
        Self::new(name, EntryKind::Directory { mount_point: false }, 0, mtime)
    }

    pub fn symlink(
        name: impl Into<CompactString>,
        size: u64,
        mtime: i64,
        target: impl Into<CompactString>,
        broken: bool,
    ) -> Self {
        let kind = EntryKind::Symlink {
            target: target.into(),
            broken,
        };
        Self::new(name, kind, size, mtime)
    }

    pub fn special(name: impl Into<CompactString>, size: u64, mtime: i64) -> Self {
        Self::new(name, EntryKind::Special, size, mtime)
    }

    /// Placeholder for an entry whose metadata could not be read.
    pub fn unreadable(name: impl Into<CompactString>, kind: EntryKind) -> Self {
        let mut entry = Self::new(name, kind, 0, 0);
        entry.error = true;
        entry
    }

    /// Keep `os_name` as the on-disk name if it is not valid UTF-8.
    pub fn with_os_name(mut self, os_name: &OsStr) -> Self {
        if os_name.to_str().is_none() {
            self.raw_name = Some(os_name.to_os_string());
        }
        self
    }

    /// The name as it exists on disk.
    pub fn os_name(&self) -> &OsStr {
        match &self.raw_name {
            Some(raw) => raw,
            None => OsStr::new(self.name.as_str()),
        }
    }

    /// Builder-style setter for the error flag.
    pub fn with_error(mut self, error: bool) -> Self {
        self.error = error;
        self
    }
}

/// Bottom-up statistics of a node's subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregate {
    /// Own size plus the aggregate size of every child.
    pub size: u64,
    /// Number of descendants (not counting the node itself).
    pub items: u64,
    /// Regular files in the subtree; a file counts itself.
    pub files: u64,
    /// Directories strictly below this node.
    pub dirs: u64,
    /// Entries with the error flag in the subtree, the node included.
    pub errors: u64,
    /// Sum of `unreadable_bytes` estimates in the subtree, the node included.
    pub unreadable_bytes: u64,
}

impl Aggregate {
    /// Aggregate of a node considered on its own, before any children.
    pub fn own(entry: &Entry) -> Self {
        Self {
            size: entry.size,
            items: 0,
            files: u64::from(entry.kind.is_file()),
            dirs: 0,
            errors: u64::from(entry.error),
            unreadable_bytes: entry.unreadable_bytes,
        }
    }

    /// Fold a finalized child into this aggregate.
    pub fn absorb(&mut self, child: &FileNode) {
        let c = &child.aggregate;
        self.size = self.size.saturating_add(c.size);
        self.items = self.items.saturating_add(1 + c.items);
        self.files = self.files.saturating_add(c.files);
        self.dirs = self
            .dirs
            .saturating_add(c.dirs + u64::from(child.entry.kind.is_dir()));
        self.errors = self.errors.saturating_add(c.errors);
        self.unreadable_bytes = self.unreadable_bytes.saturating_add(c.unreadable_bytes);
    }
}

/// An entry plus its place in the arena and its cached aggregate.
///
/// Children form a singly-linked list in insertion order via
/// `first_child` / `next_sibling`; `last_child` makes appends O(1).
#[derive(Debug, Clone)]
pub struct FileNode {
    pub entry: Entry,
    pub aggregate: Aggregate,
    pub(crate) parent: Option<u32>,
    pub(crate) first_child: Option<u32>,
    pub(crate) last_child: Option<u32>,
    pub(crate) next_sibling: Option<u32>,
}

impl FileNode {
    pub(crate) fn new(entry: Entry, parent: Option<u32>) -> Self {
        let aggregate = Aggregate::own(&entry);
        Self {
            entry,
            aggregate,
            parent,
            first_child: None,
            last_child: None,
            next_sibling: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.entry.name.as_str()
    }

    #[inline]
    pub fn kind(&self) -> &EntryKind {
        &self.entry.kind
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.entry.kind.is_dir()
    }

    /// Aggregate size in bytes (own size for leaves).
    #[inline]
    pub fn size(&self) -> u64 {
        self.aggregate.size
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        self.first_child.is_some()
    }
}
