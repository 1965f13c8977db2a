//! DirSleuth Core: scanning, tree model, and cache persistence.
//!
//! This crate contains all business logic with zero UI dependencies.
//! Any frontend (CLI, TUI, GUI) drives it through [`controller::ScanController`]
//! and reads results through the read-only [`model::FileTree`] it exposes.
//!
//! # Modules
//!
//! - [`model`]: Arena-allocated file tree, entries, and aggregates.
//! - [`scanner`]: Depth-first filesystem walker with progress and cancellation.
//! - [`cache`]: Line-oriented cache file reader and writer.
//! - [`controller`]: Scan lifecycle state machine and background worker.
//! - [`analysis`]: Post-scan helpers (largest files, CSV export).
//! - [`config`]: Scan configuration and exclude rules.
//! - [`error`]: Error taxonomy shared by every module.
pub mod analysis;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod scanner;

pub use config::ScanConfig;
pub use controller::{ScanController, ScanEvent, ScanState};
pub use error::CoreError;
pub use model::{EntryKind, FileTree, NodeIndex, ScanOutcome};
