//! Flat CSV listing of a tree, one row per entry in depth-first order.
use crate::error::CoreError;
use crate::model::FileTree;
use chrono::{DateTime, SecondsFormat};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const HEADER: [&str; 7] = ["path", "type", "size", "items", "modified", "error", "partial"];

/// Write `tree` as CSV to any writer.
///
/// `size` and `items` are the node's aggregates; `modified` is RFC 3339 UTC.
/// I/O failures are reported as [`CoreError::Io`] with an empty path.
pub fn export_csv<W: Write>(tree: &FileTree, writer: W) -> Result<(), CoreError> {
    let csv_err = |e: csv::Error| CoreError::io(PathBuf::new(), io::Error::from(e));
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(HEADER).map_err(csv_err)?;

    for (index, node) in tree.iter() {
        let entry = &node.entry;
        let modified = DateTime::from_timestamp(entry.mtime, 0)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();
        wtr.write_record([
            tree.full_path(index).to_string_lossy().as_ref(),
            entry.kind.label(),
            &node.aggregate.size.to_string(),
            &node.aggregate.items.to_string(),
            &modified,
            if entry.error { "true" } else { "false" },
            if entry.partial { "true" } else { "false" },
        ])
        .map_err(csv_err)?;
    }
    wtr.flush().map_err(|e| CoreError::io(PathBuf::new(), e))?;
    Ok(())
}

/// Write `tree` as CSV to a file at `path`.
pub fn export_csv_file(tree: &FileTree, path: &Path) -> Result<(), CoreError> {
    let file = File::create(path).map_err(|e| CoreError::io(path, e))?;
    export_csv(tree, file).map_err(|err| match err {
        CoreError::Io { source, .. } => CoreError::io(path, source),
        other => other,
    })
}
