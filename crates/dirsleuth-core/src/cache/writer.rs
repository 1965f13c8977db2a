use super::{encode_flags, escape, escape_os, kind_tag, CLOSE_DIR, END, FORMAT_VERSION, MAGIC, SEP};
use super::{OUTCOME_ABORTED, OUTCOME_FINISHED};
use crate::error::CoreError;
use crate::model::{Children, EntryKind, FileNode, FileTree, ScanOutcome};
use chrono::{SecondsFormat, Utc};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Write `tree` to `path` atomically.
///
/// The file is produced under a temporary name in the destination directory
/// and renamed over `path` only after everything has been flushed, so a
/// failed write never leaves a truncated cache behind.
pub fn write_cache(tree: &FileTree, path: &Path) -> Result<(), CoreError> {
    header_outcome(tree)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| CoreError::io(&dir, e))?;

    {
        let mut out = BufWriter::new(temp.as_file_mut());
        writeln!(out, "# dirsleuth cache")
            .and_then(|_| {
                writeln!(
                    out,
                    "# written {}",
                    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
                )
            })
            .map_err(|e| CoreError::io(path, e))?;
        write_to(tree, &mut out).map_err(|e| with_path(e, path))?;
        out.flush().map_err(|e| CoreError::io(path, e))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|e| CoreError::io(path, e))?;
    temp.persist(path)
        .map_err(|e| CoreError::io(path, e.error))?;

    let bytes = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    info!(
        "Saved {} entries to {} ({bytes} bytes)",
        tree.len(),
        path.display()
    );
    Ok(())
}

/// Stream `tree` in cache format to any writer, entry by entry.
///
/// I/O failures are reported as [`CoreError::Io`] with an empty path.
pub fn write_to<W: Write>(tree: &FileTree, out: &mut W) -> Result<(), CoreError> {
    let outcome = header_outcome(tree)?;
    let Some(root) = tree.root() else {
        return Err(empty_tree());
    };

    let io_err = |e: io::Error| CoreError::io(PathBuf::new(), e);
    writeln!(
        out,
        "{MAGIC}{SEP}{FORMAT_VERSION}{SEP}{outcome}{SEP}{}",
        escape_os(tree.root_path().as_os_str())
    )
    .map_err(io_err)?;

    // One child iterator per open directory.
    let mut open: Vec<Children<'_>> = Vec::new();
    write_record(out, tree.node(root)).map_err(io_err)?;
    if tree.node(root).is_dir() {
        open.push(tree.children(root));
    }

    while let Some(children) = open.last_mut() {
        match children.next() {
            Some(child) => {
                let node = tree.node(child);
                write_record(out, node).map_err(io_err)?;
                if node.is_dir() {
                    open.push(tree.children(child));
                }
            }
            None => {
                open.pop();
                writeln!(out, "{CLOSE_DIR}").map_err(io_err)?;
            }
        }
    }

    writeln!(out, "{END}{SEP}{}", tree.len()).map_err(io_err)?;
    debug!("Serialized {} entries", tree.len());
    Ok(())
}

fn write_record<W: Write>(out: &mut W, node: &FileNode) -> io::Result<()> {
    let entry = &node.entry;
    write!(
        out,
        "{}{SEP}{}{SEP}{}{SEP}{}{SEP}{}",
        kind_tag(&entry.kind),
        entry.size,
        entry.mtime,
        encode_flags(entry),
        escape_os(entry.os_name())
    )?;
    if let EntryKind::Symlink { target, .. } = &entry.kind {
        write!(out, "{SEP}{}", escape(target))?;
    }
    writeln!(out)
}

/// Outcome keyword for the header, or why the tree cannot be saved.
fn header_outcome(tree: &FileTree) -> Result<&'static str, CoreError> {
    match tree.outcome() {
        _ if tree.is_empty() => Err(empty_tree()),
        ScanOutcome::Finished => Ok(OUTCOME_FINISHED),
        ScanOutcome::Aborted => Ok(OUTCOME_ABORTED),
        ScanOutcome::InProgress => Err(CoreError::InvalidState {
            operation: "write a cache",
            state: "the tree is still being populated",
        }),
        ScanOutcome::NeverRun | ScanOutcome::Failed => Err(empty_tree()),
    }
}

fn empty_tree() -> CoreError {
    CoreError::InvalidState {
        operation: "write a cache",
        state: "the tree is empty",
    }
}

fn with_path(err: CoreError, path: &Path) -> CoreError {
    match err {
        CoreError::Io { source, .. } => CoreError::io(path, source),
        other => other,
    }
}
