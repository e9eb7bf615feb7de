use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cache::IndexedPathCache;
use crate::catalog::{Catalog, SqliteCatalog};
use crate::config::Config;
use crate::pipeline::Pipelines;
use crate::scanner::Scanner;
use crate::search::{NullSearchIndex, SearchIndex};
use crate::slotpool::SlotPool;
use crate::stats::{Stats, StatsSnapshot};
use crate::ui::{NullUi, SlotUi, TerminalUi};

/// Orchestrator: owns `Config`, `Stats`, the indexed-path cache, and the
/// lifecycle of `Catalog`/`SearchIndex`/`Scanner`/`SlotPool` (spec §2 item
/// 9). Generalizes the teacher's free-function orchestration in `main.rs`
/// (`init_db`/`find_src_files`/`spawn_workers`) into a reusable struct so
/// a CLI wrapper — or a test — can drive `run()` without re-parsing
/// config or re-opening the catalog for each call.
pub struct Indexer {
    config: Config,
    stats: Arc<Stats>,
    cache: Arc<IndexedPathCache>,
    scanner: Arc<Scanner>,
    pool: Arc<SlotPool>,
    pipelines: Pipelines,
}

impl Indexer {
    pub fn new(config: Config, interactive_ui: bool) -> Result<Self> {
        let catalog: Arc<dyn Catalog> = if config.services.database.url == ":memory:" {
            Arc::new(SqliteCatalog::open_in_memory().context("failed to open in-memory catalog database")?)
        } else {
            let db_path: std::path::PathBuf = config.services.database.url.clone().into();
            Arc::new(SqliteCatalog::open(&db_path).with_context(|| {
                format!(
                    "failed to open catalog database at {}",
                    config.services.database.url
                )
            })?)
        };

        let search: Arc<dyn SearchIndex> = Self::build_search_index(&config);

        let cache = Arc::new(IndexedPathCache::load(config.cache.as_deref()));
        let stats = Arc::new(Stats::default());

        let ui: Arc<dyn SlotUi> = if interactive_ui {
            Arc::new(TerminalUi::new(config.concurrency.max(1)))
        } else {
            Arc::new(NullUi)
        };

        let pool = Arc::new(SlotPool::new(config.concurrency, ui.clone()));

        let image_block = config.image_block();
        let text_block = config.text_block();
        let video_block = config.video_block();

        let scanner = Arc::new(
            Scanner::new(
                &image_block.pattern,
                image_block.exclude.as_deref(),
                image_block.enabled,
                &text_block.pattern,
                text_block.exclude.as_deref(),
                text_block.enabled,
                &video_block.pattern,
                video_block.exclude.as_deref(),
                video_block.enabled,
                &config.scanner.exclude,
                config.scanner.recursive,
                config.scanner.dotfiles,
                config.scanner.sort,
                config.scanner.max_depth,
                config.scanner.follow_symlinks,
                config.scanner.concurrency,
            )
            .context("failed to build scanner from configuration")?,
        );

        let pipelines = Pipelines::new(
            &config,
            catalog.clone(),
            search.clone(),
            cache.clone(),
            ui.clone(),
            stats.clone(),
        );

        Ok(Indexer {
            config,
            stats,
            cache,
            scanner,
            pool,
            pipelines,
        })
    }

    #[cfg(feature = "elastic")]
    fn build_search_index(config: &Config) -> Arc<dyn SearchIndex> {
        if config.services.elastic.enabled {
            Arc::new(crate::search::ElasticSearchIndex::new(&config.services.elastic.node))
        } else {
            Arc::new(NullSearchIndex)
        }
    }

    #[cfg(not(feature = "elastic"))]
    fn build_search_index(config: &Config) -> Arc<dyn SearchIndex> {
        if config.services.elastic.enabled {
            log::warn!(
                "services.elastic.enabled is set but this binary was built without the \
                 'elastic' feature; search indexing stays disabled"
            );
        }
        Arc::new(NullSearchIndex)
    }

    /// Installs a SIGINT handler implementing spec §5's graceful-cancel
    /// path: flush the indexed-path cache, restore the terminal, exit.
    /// In-flight conversions are abandoned; their partial artifacts are
    /// orphans left for the next scan's cleanup (spec §1 non-goal: no
    /// mid-stream conversion resume).
    pub fn install_signal_handler(self: &Arc<Self>) -> Result<()> {
        let indexer = self.clone();
        ctrlc::set_handler(move || {
            log::warn!("interrupted, flushing indexed-path cache before exit");
            if let Err(e) = indexer.flush_index_cache() {
                log::error!("failed to flush indexed-path cache: {e}");
            }
            indexer.pool.ui().shutdown();
            std::process::exit(130);
        })
        .context("failed to install SIGINT handler")
    }

    /// `flushIndexCache()` (spec §9): persists the indexed-path cache to
    /// disk. Called on graceful exit and is what the signal handler calls
    /// on interrupt.
    pub fn flush_index_cache(&self) -> Result<()> {
        self.cache.flush()
    }

    /// Runs one scan-to-completion pass over `config.scan` and returns
    /// the final tally. Mirrors spec §2's data flow: Scanner -> Indexer
    /// queue -> SlotPool -> Pipeline -> stats.
    pub fn run(&self) -> StatsSnapshot {
        let roots = self.config.scan.clone();
        let rx = self.scanner.scan(roots, self.stats.clone());

        let pool = self.pool.clone();
        let pipelines = &self.pipelines;
        self.pool.run_workers(rx, move |slot, file| {
            pipelines.dispatch(&pool, slot, file);
        });

        self.stats.snapshot()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes a stand-in "shasum" executable that always prints the same
    /// fingerprint, so the test never shells out to a real hash tool.
    fn stub_hasher(dir: &std::path::Path) -> std::path::PathBuf {
        let script = dir.join("fake-shasum.sh");
        std::fs::write(&script, b"#!/bin/sh\necho 'abc123 -'\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&script).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&script, perms).unwrap();
        }
        script
    }

    fn config_with_scan(dir: &std::path::Path, shasum: &std::path::Path) -> Config {
        let mut cfg = Config::default();
        cfg.scan = vec![dir.to_path_buf()];
        cfg.save = dir.join("save");
        cfg.cache = None;
        cfg.shasum = shasum.to_string_lossy().into_owned();
        cfg.services.database.url = ":memory:".to_string();
        cfg.types.image = Some(crate::config::TypeBlock {
            enabled: false,
            ..cfg.image_block()
        });
        cfg.types.video = Some(crate::config::TypeBlock {
            enabled: false,
            ..cfg.video_block()
        });
        cfg
    }

    #[test]
    fn indexer_builds_from_default_config_with_in_memory_catalog() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello world, this text is long enough").unwrap();
        let shasum = stub_hasher(dir.path());

        let cfg = config_with_scan(dir.path(), &shasum);
        let indexer = Indexer::new(cfg, false).unwrap();
        let snapshot = indexer.run();

        assert_eq!(snapshot.texts, 1);
        assert_eq!(snapshot.converted, 1);
    }
}
