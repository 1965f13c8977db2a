//! Error taxonomy for the core crate.
//!
//! Per-entry scan failures (permission denied, vanished entries) are *not*
//! represented here: the walker absorbs them into the tree as flagged
//! entries. Everything in [`CoreError`] is surfaced to the caller.
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by tree, cache, and controller operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The operation is not valid in the current lifecycle state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// The node reference does not belong to this tree or is not a directory.
    #[error("node reference does not name a directory in this tree")]
    InvalidParent,

    /// Malformed cache input. `line` is 1-based.
    #[error("cache parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Filesystem-level failure on a cache or config file.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The top-level scan path could not be stat'ed or listed.
    #[error("cannot scan {}: {source}", path.display())]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A configuration file could not be loaded.
    #[error("invalid configuration in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    /// An exclude rule is not a valid regular expression.
    #[error("invalid exclude pattern '{pattern}': {source}")]
    InvalidExclude {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The background worker thread could not be started.
    #[error("failed to spawn scan worker: {0}")]
    Spawn(#[source] io::Error),
}

impl CoreError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Build a parse error for the given 1-based line.
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Line number of a parse error, if this is one.
    pub fn parse_line(&self) -> Option<usize> {
        match self {
            Self::Parse { line, .. } => Some(*line),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_mentions_line() {
        let err = CoreError::parse(17, "unterminated directory");
        assert_eq!(err.parse_line(), Some(17));
        assert!(err.to_string().contains("line 17"));
    }

    #[test]
    fn invalid_state_message() {
        let err = CoreError::InvalidState {
            operation: "start a scan",
            state: "scanning",
        };
        assert_eq!(err.to_string(), "cannot start a scan while scanning");
        assert_eq!(err.parse_line(), None);
    }
}
