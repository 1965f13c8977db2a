//! Analysis modules: read-only passes over a finished tree.

pub mod export;
pub mod top_files;

pub use export::{export_csv, export_csv_file};
pub use top_files::{top_files, LargestFile};
