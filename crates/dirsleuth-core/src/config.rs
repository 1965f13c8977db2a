//! Scan configuration.
//!
//! Every field has a default so a JSON config file only needs to name the
//! settings it changes.
use crate::error::CoreError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default spacing between progress notifications.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;

/// Exclude rule applied when a config does not name its own.
pub const DEFAULT_EXCLUDE: &str = r".*/\.snapshot$";

/// Options controlling a live filesystem walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Read-ahead threads for the walker. `0` = one per logical CPU.
    pub threads: usize,

    /// Descend into directories that live on another filesystem.
    /// When `false` such directories are recorded as mount points only.
    pub cross_filesystems: bool,

    /// Minimum spacing between progress notifications, in milliseconds.
    pub progress_interval_ms: u64,

    /// Visit siblings in name order so repeated scans produce identical trees.
    pub sort_entries: bool,

    /// Regular expressions matched against the full path of every entry
    /// below the root. A rule must match the whole path; matching entries
    /// are left out of the tree and never descended.
    pub exclude: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            cross_filesystems: false,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            sort_entries: true,
            exclude: vec![DEFAULT_EXCLUDE.to_string()],
        }
    }
}

impl ScanConfig {
    /// Load a config from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| CoreError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Compile [`exclude`](Self::exclude).
    pub fn exclude_rules(&self) -> Result<ExcludeRules, CoreError> {
        ExcludeRules::new(self.exclude.as_slice())
    }

    /// Progress spacing as a `Duration`.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Number of read-ahead threads to hand to the walker.
    pub fn effective_threads(&self) -> usize {
        match self.threads {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }
}

/// Compiled exclude rules.
#[derive(Debug, Clone, Default)]
pub struct ExcludeRules {
    rules: Vec<Regex>,
}

impl ExcludeRules {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, CoreError> {
        let rules = patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
                    CoreError::InvalidExclude {
                        pattern: pattern.to_string(),
                        source,
                    }
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `true` if any rule matches all of `path`.
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let path = path.to_string_lossy();
        self.rules.iter().any(|rule| rule.is_match(&path))
    }
}
