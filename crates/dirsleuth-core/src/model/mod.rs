//! Data model for the DirSleuth file tree.
//!
//! Re-exports the arena-allocated tree structure and supporting types.
pub mod entry;
pub mod file_tree;
pub mod size;

pub use entry::{Aggregate, Entry, EntryKind, FileNode, NodeIndex};
pub use file_tree::{Children, FileTree, ScanOutcome, TreeStats};
