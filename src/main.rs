mod cache;
mod catalog;
mod common;
mod config;
mod error;
mod exec;
mod hasher;
mod indexer;
mod model;
mod pipeline;
mod scanner;
mod search;
mod slotpool;
mod stats;
mod ui;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use argh::FromArgs;

use crate::config::Config;
use crate::indexer::Indexer;

/**
Scans a tree of images, text files and videos, fingerprints each one,
transcodes it into canonical form under the save directory, and records
it in a content-addressed catalog so the same content is never stored
twice.
- Run again over the same roots to pick up new files; previously
  indexed paths are skipped via the indexed-path cache unless --delete
  forces reprocessing.
- Symlinked directories are only followed when explicitly enabled.
- Ctrl-C flushes the indexed-path cache and exits; any conversion in
  flight is abandoned, not resumed.
 */
#[derive(FromArgs, Debug, Clone)]
struct Args {
    /// root directory to scan (can be given multiple times)
    #[argh(option, short = 's')]
    scan: Vec<PathBuf>,

    /// directory to save canonical, content-addressed output under
    #[argh(option, short = 'o')]
    save: Option<PathBuf>,

    /// number of concurrent worker slots (default=number of CPUs)
    #[argh(option, short = 'j')]
    concurrency: Option<usize>,

    /// path to the indexed-path cache file
    #[argh(option)]
    cache: Option<PathBuf>,

    /// path to a TOML config file; CLI flags override its values
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// disable the terminal progress UI (implied when stdout isn't a tty)
    #[argh(switch)]
    no_progress: bool,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if !args.scan.is_empty() {
        config.scan = args.scan.clone();
    }
    if let Some(save) = &args.save {
        config.save = save.clone();
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if args.cache.is_some() {
        config.cache = args.cache.clone();
    }

    ensure!(!config.scan.is_empty(), "at least one --scan root must be provided");
    for root in &config.scan {
        ensure!(root.is_dir(), "--scan root '{}' is not a directory", root.display());
    }

    let interactive = !args.no_progress && std::io::stdout().is_terminal();

    let indexer = Arc::new(Indexer::new(config, interactive)?);
    indexer.install_signal_handler()?;

    let started = std::time::Instant::now();
    let snapshot = indexer.run();
    let elapsed = started.elapsed();

    indexer.flush_index_cache()?;

    log::info!(
        "scan complete in {:.1}s: {} directories, {} files ({} images, {} texts, {} videos); \
         {} converted, {} duplicates, {} skipped, {} failed",
        elapsed.as_secs_f64(),
        snapshot.directories,
        snapshot.files,
        snapshot.images,
        snapshot.texts,
        snapshot.videos,
        snapshot.converted,
        snapshot.duplicates,
        snapshot.skipped,
        snapshot.failed,
    );

    println!(
        "{} converted, {} duplicates, {} skipped, {} failed ({} images, {} texts, {} videos)",
        snapshot.converted,
        snapshot.duplicates,
        snapshot.skipped,
        snapshot.failed,
        snapshot.images,
        snapshot.texts,
        snapshot.videos,
    );

    if snapshot.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
