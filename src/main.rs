//! DirSleuth: a directory-usage inspector.
//!
//! Thin binary entry point. All logic lives in `dirsleuth-core`; this
//! drives a [`ScanController`] on the main thread, prints progress to
//! stderr and a summary of the resulting tree to stdout.
//!
//! ```bash
//! dirsleuth scan ~/projects --top 20 --save projects.cache
//! dirsleuth load projects.cache --csv projects.csv
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dirsleuth_core::analysis::{export_csv_file, top_files};
use dirsleuth_core::model::size::{format_count, format_size};
use dirsleuth_core::{ScanConfig, ScanController, ScanEvent, ScanState};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Minimum spacing of progress lines on stderr.
const PROGRESS_PRINT_INTERVAL: Duration = Duration::from_millis(500);

/// How long one pump of the controller may block.
const PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Scan directories, cache the results and report where the space went.
#[derive(Parser)]
#[command(name = "dirsleuth", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk a directory tree.
    Scan(ScanArgs),
    /// Reload a tree from a cache file written by `--save`.
    Load(LoadArgs),
}

#[derive(Args)]
struct ScanArgs {
    /// Directory (or file) to scan.
    path: PathBuf,

    /// JSON scan configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read-ahead threads (0 = one per CPU). Overrides the config file.
    #[arg(long)]
    threads: Option<usize>,

    /// Descend into directories on other filesystems.
    #[arg(long)]
    cross_filesystems: bool,

    /// Leave out entries whose full path matches this regular expression.
    /// Repeatable; added to the configured rules.
    #[arg(long, value_name = "REGEX")]
    exclude: Vec<String>,

    /// Abort the scan after this many milliseconds and keep the partial tree.
    #[arg(long, value_name = "MS")]
    abort_after_ms: Option<u64>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct LoadArgs {
    /// Cache file to load.
    cache: PathBuf,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct OutputArgs {
    /// Write the tree to a cache file.
    #[arg(long, value_name = "CACHE")]
    save: Option<PathBuf>,

    /// Export a flat CSV listing.
    #[arg(long, value_name = "FILE")]
    csv: Option<PathBuf>,

    /// Number of largest files to list.
    #[arg(long, default_value_t = 10)]
    top: usize,
}

fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let (mut controller, output, abort_after) = match cli.command {
        Command::Scan(args) => {
            let config = build_config(&args)?;
            let mut controller = ScanController::new(config);
            controller
                .start_scan(&args.path)
                .with_context(|| format!("starting scan of {}", args.path.display()))?;
            (
                controller,
                args.output,
                args.abort_after_ms.map(Duration::from_millis),
            )
        }
        Command::Load(args) => {
            let mut controller = ScanController::default();
            controller
                .load_cache(&args.cache)
                .with_context(|| format!("loading {}", args.cache.display()))?;
            (controller, args.output, None)
        }
    };

    run_session(&mut controller, abort_after)?;

    if controller.state() == ScanState::Failed {
        eprintln!(
            "error: {}",
            controller.failure().unwrap_or("session failed")
        );
        return Ok(ExitCode::FAILURE);
    }

    print_summary(&controller, output.top);

    if let Some(path) = &output.save {
        controller
            .save_cache(path)
            .with_context(|| format!("saving cache to {}", path.display()))?;
        println!("wrote cache: {}", path.display());
    }
    if let Some(path) = &output.csv {
        export_csv_file(controller.tree(), path)
            .with_context(|| format!("exporting CSV to {}", path.display()))?;
        println!("wrote CSV: {}", path.display());
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dirsleuth=info,dirsleuth_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn build_config(args: &ScanArgs) -> anyhow::Result<ScanConfig> {
    let mut config = match &args.config {
        Some(path) => ScanConfig::from_json_file(path)?,
        None => ScanConfig::default(),
    };
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if args.cross_filesystems {
        config.cross_filesystems = true;
    }
    config.exclude.extend(args.exclude.iter().cloned());
    debug!("Effective config: {config:?}");
    Ok(config)
}

/// Pump the controller until the session ends.
fn run_session(
    controller: &mut ScanController,
    abort_after: Option<Duration>,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut last_print: Option<Instant> = None;
    let mut abort_sent = false;

    while controller.is_busy() {
        if let Some(limit) = abort_after {
            if !abort_sent && start.elapsed() >= limit {
                info!("Aborting after {limit:?}");
                controller.abort_scan()?;
                abort_sent = true;
            }
        }

        for event in controller.wait(PUMP_INTERVAL) {
            match event {
                ScanEvent::Started { path, source } => {
                    info!("{source:?} session on {}", path.display());
                }
                ScanEvent::Progress(progress) => {
                    if last_print.is_some_and(|t| t.elapsed() < PROGRESS_PRINT_INTERVAL) {
                        continue;
                    }
                    last_print = Some(Instant::now());
                    eprintln!(
                        "  {} entries, {} so far, {} errors ... {}",
                        format_count(progress.entries_visited),
                        format_size(progress.bytes_accumulated),
                        format_count(progress.errors),
                        progress.current_path.display()
                    );
                }
                ScanEvent::EntryError { path, message } => {
                    debug!("{}: {message}", path.display());
                }
                ScanEvent::Finished { duration } | ScanEvent::Aborted { duration } => {
                    info!("Session ended after {duration:?}");
                }
                ScanEvent::Failed { reason } => debug!("Session failed: {reason}"),
            }
        }
    }
    Ok(())
}

fn print_summary(controller: &ScanController, top: usize) {
    let tree = controller.tree();
    let stats = tree.stats();
    let partial = if tree.is_partial() { " (partial)" } else { "" };

    println!("root:      {}", tree.root_path().display());
    println!("outcome:   {}{partial}", controller.state().label());
    println!("total:     {}", format_size(stats.total_size));
    println!(
        "entries:   {} files, {} directories, {} symlinks ({} broken), {} special",
        format_count(stats.files),
        format_count(stats.dirs),
        format_count(stats.symlinks),
        format_count(stats.broken_symlinks),
        format_count(stats.specials),
    );
    if stats.errors > 0 {
        println!(
            "errors:    {} unreadable entries ({} unaccounted)",
            format_count(stats.errors),
            format_size(stats.unreadable_bytes)
        );
    }
    if stats.partial_dirs > 0 {
        println!(
            "partial:   {} directories were still open when the scan stopped",
            format_count(stats.partial_dirs)
        );
    }
    if let Some(duration) = controller.last_duration() {
        println!("duration:  {duration:.2?}");
    }

    let largest = top_files(tree, top);
    if !largest.is_empty() {
        println!();
        println!("largest files:");
        for file in largest {
            println!("  {:>10}  {}", format_size(file.size), file.path.display());
        }
    }
}
