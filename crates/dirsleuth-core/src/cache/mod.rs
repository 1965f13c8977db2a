//! Line-oriented cache format, version 1.
//!
//! ```text
//! # comment lines and blank lines are ignored
//! CACHE	1	finished	/home/user/data
//! D	0	1700000000	-	data
//! F	100	1700000000	-	a.txt
//! L	7	1700000000	b	dangling	../missing
//! D	0	1700000000	e	locked
//! }
//! }
//! END	4
//! ```
//!
//! Fields are TAB-separated. `D` opens a directory whose children follow
//! until the matching `}`; nesting alone gives the depth. Flags are `-` or
//! letters from `e` (error), `p` (partial), `b` (broken link), `m` (mount
//! point), optionally followed by `:<unreadable bytes>`.
mod reader;
mod writer;

pub use reader::{read_cache, read_from};
pub use writer::{write_cache, write_to};

use crate::error::CoreError;
use crate::model::{Entry, EntryKind};
use std::ffi::{OsStr, OsString};

pub(crate) const MAGIC: &str = "CACHE";
pub(crate) const FORMAT_VERSION: u32 = 1;
pub(crate) const END: &str = "END";
pub(crate) const CLOSE_DIR: &str = "}";
pub(crate) const SEP: char = '\t';

pub(crate) const OUTCOME_FINISHED: &str = "finished";
pub(crate) const OUTCOME_ABORTED: &str = "aborted";

pub(crate) fn kind_tag(kind: &EntryKind) -> char {
    match kind {
        EntryKind::File => 'F',
        EntryKind::Directory { .. } => 'D',
        EntryKind::Symlink { .. } => 'L',
        EntryKind::Special => 'S',
    }
}

/// Escape `\`, TAB, LF and CR so a value fits in one field.
pub(crate) fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape an OS string. On Unix, bytes that are not valid UTF-8 are written
/// as `\xNN`; elsewhere the lossy form is written.
pub(crate) fn escape_os(value: &OsStr) -> String {
    #[cfg(unix)]
    {
        use std::fmt::Write as _;
        use std::os::unix::ffi::OsStrExt;

        let mut out = String::with_capacity(value.len());
        let mut bytes = value.as_bytes();
        loop {
            match std::str::from_utf8(bytes) {
                Ok(valid) => {
                    out.push_str(&escape(valid));
                    return out;
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    out.push_str(&escape(&String::from_utf8_lossy(valid)));
                    let bad = err.error_len().unwrap_or(rest.len());
                    for byte in &rest[..bad] {
                        let _ = write!(out, "\\x{byte:02x}");
                    }
                    bytes = &rest[bad..];
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        escape(&value.to_string_lossy())
    }
}

/// Reverse of [`escape`] and [`escape_os`], yielding raw bytes. Any other
/// escape sequence is malformed.
fn unescape_bytes(field: &str, line: usize) -> Result<Vec<u8>, CoreError> {
    let mut out = Vec::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut utf8 = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            continue;
        }
        match chars.next() {
            Some('\\') => out.push(b'\\'),
            Some('t') => out.push(b'\t'),
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let byte = (hex.len() == 2)
                    .then(|| u8::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .ok_or_else(|| CoreError::parse(line, format!("invalid byte escape '\\x{hex}'")))?;
                out.push(byte);
            }
            Some(other) => {
                return Err(CoreError::parse(line, format!("invalid escape '\\{other}'")))
            }
            None => return Err(CoreError::parse(line, "dangling '\\' at end of field")),
        }
    }
    Ok(out)
}

/// Unescape a field that must be valid UTF-8.
pub(crate) fn unescape(field: &str, line: usize) -> Result<String, CoreError> {
    if !field.contains('\\') {
        return Ok(field.to_string());
    }
    String::from_utf8(unescape_bytes(field, line)?)
        .map_err(|_| CoreError::parse(line, "field is not valid UTF-8"))
}

/// Unescape a name or path field, keeping bytes that are not valid UTF-8.
pub(crate) fn unescape_os(field: &str, line: usize) -> Result<OsString, CoreError> {
    if !field.contains('\\') {
        return Ok(OsString::from(field));
    }
    let bytes = unescape_bytes(field, line)?;
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        Ok(OsString::from_vec(bytes))
    }
    #[cfg(not(unix))]
    {
        String::from_utf8(bytes)
            .map(OsString::from)
            .map_err(|_| CoreError::parse(line, "non-UTF-8 names are only supported on Unix"))
    }
}

/// Render the flags field for an entry.
pub(crate) fn encode_flags(entry: &Entry) -> String {
    let mut flags = String::new();
    if entry.error {
        flags.push('e');
    }
    if entry.partial {
        flags.push('p');
    }
    match entry.kind {
        EntryKind::Symlink { broken: true, .. } => flags.push('b'),
        EntryKind::Directory { mount_point: true } => flags.push('m'),
        _ => {}
    }
    if entry.unreadable_bytes > 0 {
        flags.push(':');
        flags.push_str(&entry.unreadable_bytes.to_string());
    }
    if flags.is_empty() {
        flags.push('-');
    }
    flags
}

/// Decoded flags field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Flags {
    pub error: bool,
    pub partial: bool,
    pub broken: bool,
    pub mount_point: bool,
    pub unreadable_bytes: u64,
}

pub(crate) fn decode_flags(field: &str, line: usize) -> Result<Flags, CoreError> {
    let mut flags = Flags::default();
    let (letters, bytes) = match field.split_once(':') {
        Some((letters, bytes)) => (letters, Some(bytes)),
        None => (field, None),
    };

    if letters != "-" {
        for c in letters.chars() {
            let slot = match c {
                'e' => &mut flags.error,
                'p' => &mut flags.partial,
                'b' => &mut flags.broken,
                'm' => &mut flags.mount_point,
                other => return Err(CoreError::parse(line, format!("unknown flag '{other}'"))),
            };
            if *slot {
                return Err(CoreError::parse(line, format!("repeated flag '{c}'")));
            }
            *slot = true;
        }
    }

    if let Some(bytes) = bytes {
        flags.unreadable_bytes = bytes
            .parse::<u64>()
            .map_err(|_| CoreError::parse(line, format!("invalid unreadable byte count '{bytes}'")))?;
    }
    Ok(flags)
}
