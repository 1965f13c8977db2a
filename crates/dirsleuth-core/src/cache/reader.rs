use super::{decode_flags, unescape, unescape_os, CLOSE_DIR, END, FORMAT_VERSION, MAGIC, SEP};
use super::{OUTCOME_ABORTED, OUTCOME_FINISHED};
use crate::error::CoreError;
use crate::model::{Entry, EntryKind, FileTree, NodeIndex, ScanOutcome};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Load a cache file written by [`write_cache`](super::write_cache).
pub fn read_cache(path: &Path) -> Result<FileTree, CoreError> {
    let start = Instant::now();
    let file = File::open(path).map_err(|e| CoreError::io(path, e))?;
    let tree = read_from(BufReader::new(file)).map_err(|err| match err {
        CoreError::Io { source, .. } => CoreError::io(path, source),
        other => other,
    })?;
    info!(
        "Loaded {} entries from {} in {:?}",
        tree.len(),
        path.display(),
        start.elapsed()
    );
    Ok(tree)
}

/// Parse a cache stream in a single pass.
///
/// All-or-nothing: any malformed line fails the whole read with
/// [`CoreError::Parse`] and no tree is returned.
pub fn read_from<R: BufRead>(mut input: R) -> Result<FileTree, CoreError> {
    let mut parser = Parser::default();
    let mut buf = String::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        let read = input.read_line(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                CoreError::parse(line_no + 1, "line is not valid UTF-8")
            } else {
                CoreError::io(PathBuf::new(), e)
            }
        })?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let line = buf.strip_suffix('\n').unwrap_or(&buf);
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        parser.line(line, line_no)?;
    }

    parser.finish(line_no)
}

#[derive(Default)]
struct Parser {
    /// `None` until the header has been read.
    tree: Option<FileTree>,
    aborted: bool,
    /// Open directories with the line that opened each.
    open: Vec<(NodeIndex, usize)>,
    /// Line of the `END` trailer once seen.
    ended: Option<usize>,
}

impl Parser {
    fn line(&mut self, line: &str, line_no: usize) -> Result<(), CoreError> {
        if self.ended.is_some() {
            return Err(CoreError::parse(line_no, "data after END trailer"));
        }
        let Some(tree) = self.tree.as_mut() else {
            return self.header(line, line_no);
        };

        if line == CLOSE_DIR {
            let Some((dir, _)) = self.open.pop() else {
                return Err(CoreError::parse(line_no, "'}' without an open directory"));
            };
            tree.finalize(dir);
            return Ok(());
        }

        let fields: Vec<&str> = line.split(SEP).collect();
        if fields[0] == END {
            return self.trailer(&fields, line_no);
        }

        let entry = parse_entry(&fields, line_no)?;
        let is_dir = entry.kind.is_dir();
        let index = match self.open.last() {
            Some(&(parent, _)) => tree.insert(parent, entry)?,
            None if tree.root().is_none() => tree.insert_root(entry)?,
            None => return Err(CoreError::parse(line_no, "entry outside the root directory")),
        };
        if is_dir {
            self.open.push((index, line_no));
        }
        Ok(())
    }

    fn header(&mut self, line: &str, line_no: usize) -> Result<(), CoreError> {
        let fields: Vec<&str> = line.split(SEP).collect();
        let [magic, version, outcome, root_path] = fields[..] else {
            return Err(CoreError::parse(line_no, "malformed header"));
        };
        if magic != MAGIC {
            return Err(CoreError::parse(line_no, "not a dirsleuth cache file"));
        }
        if version != FORMAT_VERSION.to_string() {
            return Err(CoreError::parse(
                line_no,
                format!("unsupported format version '{version}'"),
            ));
        }
        self.aborted = match outcome {
            OUTCOME_FINISHED => false,
            OUTCOME_ABORTED => true,
            other => return Err(CoreError::parse(line_no, format!("unknown outcome '{other}'"))),
        };
        self.tree = Some(FileTree::in_progress(PathBuf::from(unescape_os(root_path, line_no)?)));
        Ok(())
    }

    fn trailer(&mut self, fields: &[&str], line_no: usize) -> Result<(), CoreError> {
        if let Some(&(_, opened)) = self.open.last() {
            return Err(unterminated(opened));
        }
        let [_, count] = fields[..] else {
            return Err(CoreError::parse(line_no, "malformed END trailer"));
        };
        let count: usize = count
            .parse()
            .map_err(|_| CoreError::parse(line_no, format!("invalid entry count '{count}'")))?;
        let actual = self.tree.as_ref().map_or(0, FileTree::len);
        if actual == 0 {
            return Err(CoreError::parse(line_no, "cache contains no root entry"));
        }
        if count != actual {
            return Err(CoreError::parse(
                line_no,
                format!("END declares {count} entries but {actual} were read"),
            ));
        }
        self.ended = Some(line_no);
        Ok(())
    }

    fn finish(self, last_line: usize) -> Result<FileTree, CoreError> {
        let Some(mut tree) = self.tree else {
            return Err(CoreError::parse(last_line.max(1), "missing CACHE header"));
        };
        if let Some(&(_, opened)) = self.open.last() {
            return Err(unterminated(opened));
        }
        if self.ended.is_none() {
            return Err(CoreError::parse(
                last_line + 1,
                "truncated file: missing END trailer",
            ));
        }

        tree.set_outcome(if self.aborted {
            ScanOutcome::Aborted
        } else {
            ScanOutcome::Finished
        });
        debug!("Parsed {} entries over {last_line} lines", tree.len());
        Ok(tree)
    }
}

fn unterminated(opened: usize) -> CoreError {
    CoreError::parse(opened, "unterminated directory")
}

fn parse_entry(fields: &[&str], line_no: usize) -> Result<Entry, CoreError> {
    let tag = fields[0];
    let expected = if tag == "L" { 6 } else { 5 };
    if !matches!(tag, "D" | "F" | "L" | "S") {
        return Err(CoreError::parse(line_no, format!("unknown record tag '{tag}'")));
    }
    if fields.len() != expected {
        return Err(CoreError::parse(
            line_no,
            format!("'{tag}' record needs {expected} fields, found {}", fields.len()),
        ));
    }

    let size: u64 = fields[1]
        .parse()
        .map_err(|_| CoreError::parse(line_no, format!("invalid size '{}'", fields[1])))?;
    let mtime: i64 = fields[2]
        .parse()
        .map_err(|_| CoreError::parse(line_no, format!("invalid mtime '{}'", fields[2])))?;
    let flags = decode_flags(fields[3], line_no)?;
    let os_name = unescape_os(fields[4], line_no)?;
    if os_name.is_empty() {
        return Err(CoreError::parse(line_no, "empty entry name"));
    }

    if flags.broken && tag != "L" {
        return Err(CoreError::parse(line_no, "'b' flag on a non-symlink"));
    }
    if (flags.mount_point || flags.partial) && tag != "D" {
        return Err(CoreError::parse(line_no, "directory flag on a non-directory"));
    }

    let name = os_name.to_string_lossy();
    let name = &*name;
    let mut entry = match tag {
        "D" => {
            let mut entry = Entry::directory(name, mtime);
            entry.size = size;
            entry.kind = EntryKind::Directory {
                mount_point: flags.mount_point,
            };
            entry
        }
        "F" => Entry::file(name, size, mtime),
        "L" => Entry::symlink(name, size, mtime, unescape(fields[5], line_no)?, flags.broken),
        _ => Entry::special(name, size, mtime),
    }
    .with_os_name(&os_name);
    entry.error = flags.error;
    entry.partial = flags.partial;
    entry.unreadable_bytes = flags.unreadable_bytes;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<FileTree, CoreError> {
        read_from(text.as_bytes())
    }

    const SAMPLE: &str = "# dirsleuth cache\n\
                          CACHE\t1\tfinished\t/data\n\
                          D\t0\t10\t-\tdata\n\
                          F\t100\t11\t-\ta.txt\n\
                          D\t0\t12\t-\tsub\n\
                          F\t50\t13\t-\tb\n\
                          F\t50\t13\t-\tc\n\
                          }\n\
                          }\n\
                          END\t5\n";

    #[test]
    fn parses_and_aggregates() {
        let tree = parse(SAMPLE).unwrap();
        assert_eq!(tree.outcome(), ScanOutcome::Finished);
        assert_eq!(tree.root_path(), Path::new("/data"));
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.total_size(), 200);
        let sub = tree.find(Path::new("sub")).unwrap();
        assert_eq!(tree.node(sub).size(), 100);
        assert_eq!(tree.node(sub).entry.mtime, 12);
    }

    #[test]
    fn unterminated_directory_reports_opening_line() {
        // The only "}" closes "sub", leaving "data" from line 3 open.
        let text = "# c\n\
                    CACHE\t1\tfinished\t/data\n\
                    D\t0\t0\t-\tdata\n\
                    F\t1\t0\t-\tx\n\
                    D\t0\t0\t-\tsub\n\
                    F\t1\t0\t-\ty\n\
                    }\n\
                    END\t4\n";
        let err = parse(text).unwrap_err();
        assert_eq!(err.parse_line(), Some(3));

        let text = "CACHE\t1\tfinished\t/d\nD\t0\t0\t-\td\nD\t0\t0\t-\tsub\n}\n";
        assert_eq!(parse(text).unwrap_err().parse_line(), Some(2));
    }

    #[test]
    fn missing_trailer_is_truncation() {
        let text = "CACHE\t1\tfinished\t/d\nD\t0\t0\t-\td\n}\n";
        let err = parse(text).unwrap_err();
        assert_eq!(err.parse_line(), Some(4));
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn bad_size_reports_its_line() {
        let text = SAMPLE.replace("F\t100\t", "F\tlots\t");
        let err = parse(&text).unwrap_err();
        assert_eq!(err.parse_line(), Some(4));
    }

    #[test]
    fn rejects_structural_errors() {
        let cases = [
            ("", "missing header"),
            ("CACHE\t2\tfinished\t/d\n", "version"),
            ("CACHE\t1\tfinished\t/d\nD\t0\t0\t-\td\n}\nEND\t9\n", "count"),
            ("CACHE\t1\tfinished\t/d\nD\t0\t0\t-\td\n}\n}\nEND\t1\n", "stray close"),
            ("CACHE\t1\tfinished\t/d\nD\t0\t0\t-\td\n}\nF\t1\t0\t-\tx\nEND\t2\n", "second root"),
            ("CACHE\t1\tfinished\t/d\nD\t0\t0\t-\td\n}\nEND\t1\nF\t1\t0\t-\tx\n", "after END"),
            ("CACHE\t1\tfinished\t/d\nX\t0\t0\t-\td\n", "tag"),
            ("CACHE\t1\tfinished\t/d\nF\t0\t0\tm\tf\nEND\t1\n", "mount flag on file"),
            ("CACHE\t1\tfinished\t/d\nL\t0\t0\t-\tl\nEND\t1\n", "missing target"),
        ];
        for (text, what) in cases {
            let err = parse(text).expect_err(what);
            assert!(err.parse_line().is_some(), "{what}: {err}");
        }
    }

    #[test]
    fn restores_flags_and_outcome() {
        let text = "CACHE\t1\taborted\t/a\\tb\n\
                    D\t0\t0\tp\tab\n\
                    D\t0\t0\te:4096\tlocked\n\
                    }\n\
                    D\t0\t0\tm\tmnt\n\
                    }\n\
                    L\t3\t0\tb\tln\tgone\n\
                    }\n\
                    END\t4\n";
        let tree = parse(text).unwrap();
        assert_eq!(tree.outcome(), ScanOutcome::Aborted);
        assert!(tree.is_partial());
        assert_eq!(tree.root_path(), Path::new("/a\tb"));

        let root = tree.root().unwrap();
        assert!(tree.node(root).entry.partial);
        assert_eq!(tree.node(root).aggregate.errors, 1);
        assert_eq!(tree.node(root).aggregate.unreadable_bytes, 4096);
        let mnt = tree.find(Path::new("mnt")).unwrap();
        assert_eq!(tree.node(mnt).entry.kind, EntryKind::Directory { mount_point: true });
        let ln = tree.find(Path::new("ln")).unwrap();
        assert!(matches!(
            tree.node(ln).kind(),
            EntryKind::Symlink { broken: true, target } if target.as_str() == "gone"
        ));
    }

    #[test]
    fn crlf_and_comments_are_tolerated() {
        let text = SAMPLE.replace('\n', "\r\n").replace("END", "# trailer\r\n\r\nEND");
        assert_eq!(parse(&text).unwrap().len(), 5);
    }
}
