use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::cache::IndexedPathCache;
use crate::catalog::Catalog;
use crate::config::EffectiveConfig;
use crate::error::IndexerError;
use crate::model::{ObjectKind, Occurrence, Record};
use crate::search::SearchIndex;
use crate::stats::Stats;
use crate::ui::SlotUi;

/// Policy and collaborators shared by all three pipelines (spec §4.7).
/// Generalizes the teacher's free-floating `db`/`util` functions into a
/// single struct threaded through each pipeline's `convert` entry point.
pub struct PipelineContext {
    pub effective: EffectiveConfig,
    pub catalog: Arc<dyn Catalog>,
    pub search: Arc<dyn SearchIndex>,
    pub cache: Arc<IndexedPathCache>,
    pub tagger: Option<Box<dyn Fn(&mut Record) + Send + Sync>>,
    /// Text-only hook (spec §4.9 step 7): transforms the raw source text
    /// before hashing/compression. `None` for image/video contexts.
    pub processor: Option<Box<dyn Fn(&str) -> String + Send + Sync>>,
    pub ui: Arc<dyn SlotUi>,
    pub stats: Arc<Stats>,
}

impl PipelineContext {
    pub fn should_delete(&self, _file: &str) -> bool {
        self.effective.delete
    }

    /// `skip(file)`: true if the file was already indexed on a previous
    /// run (tracked by the indexed-path cache, spec §6) and the delete
    /// policy doesn't force reprocessing.
    pub fn skip(&self, kind: ObjectKind, file: &Path) -> bool {
        if !self.effective.can_skip || self.should_delete(&file.to_string_lossy()) {
            return false;
        }
        let key = file.to_string_lossy().into_owned();
        if self.cache.contains(&key) {
            self.stats.inc_skipped();
            log::debug!("skipped:{} {}", kind.as_str(), key);
            true
        } else {
            false
        }
    }

    /// `tag(model)`: invoke the optional tagger hook, then stamp
    /// `metadata.updated`. `dropTags` clears any tags inherited from a
    /// prior run before the tagger re-derives them, per spec §9's
    /// cascading-config note.
    pub fn tag(&self, record: &mut Record) {
        if self.effective.drop_tags {
            record.metadata.tags.clear();
        }
        if let Some(tagger) = &self.tagger {
            tagger(record);
        }
        record.metadata.updated = Utc::now();
    }

    pub fn insert(&self, record: &Record) -> Result<(), IndexerError> {
        self.catalog.insert(record)
    }

    pub fn replace(&self, id: &str, record: &Record) -> Result<(), IndexerError> {
        self.catalog.replace(id, record)
    }

    pub fn lookup(&self, key: &str) -> Result<Option<Record>, IndexerError> {
        self.catalog.lookup(key)
    }

    /// Removes the file at `path` if the delete policy allows it.
    /// Best-effort: I/O failures are logged, never surfaced — a
    /// left-behind source file is not a correctness problem.
    pub fn delete_source(&self, path: &str) {
        if !self.should_delete(path) {
            return;
        }
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("failed to delete source {path}: {e}");
        }
    }

    pub fn mark_indexed(&self, path: &str) {
        self.cache.mark(path.to_string());
    }

    pub fn spinner(&self, slot: usize, format: &str, name: &str) {
        self.ui.spinner(slot, format, name);
    }
}

/// `duplicate(model, occurrence)`: the merge protocol, spec §4.11. Shared
/// by all three pipelines and by Video's post-convert-hash dedup path
/// (spec §4.10 step 10). Mirrors the teacher's cache-hit branch in
/// `worker::process_file` — only touch what actually changed, then
/// persist once.
pub fn duplicate(
    ctx: &PipelineContext,
    kind: ObjectKind,
    model: &mut Record,
    occurrence: Occurrence,
) -> Result<(), IndexerError> {
    ctx.stats.inc_duplicates();

    let source_file = occurrence.file.clone();
    let already_present = model
        .metadata
        .occurrences
        .iter()
        .any(|o| o.file == occurrence.file);
    if !already_present {
        model.metadata.occurrences.push(occurrence);
    }
    model.rebuild_sources();

    ctx.tag(model);
    ctx.replace(&model.id.clone(), model)?;
    ctx.delete_source(&source_file);

    log::info!("duplicate:{} {}", kind.as_str(), source_file);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use crate::config::Config;
    use crate::model::Metadata;
    use crate::search::NullSearchIndex;
    use crate::ui::NullUi;
    use std::collections::BTreeSet;

    fn occ(id: &str, file: &str) -> Occurrence {
        Occurrence {
            id: id.to_string(),
            file: file.to_string(),
            path: file.to_string(),
            name: file.to_string(),
            extension: "mp4".to_string(),
            size: 10,
            timestamp: 0,
        }
    }

    fn ctx() -> PipelineContext {
        let cfg = Config::default();
        let block = cfg.video_block();
        PipelineContext {
            effective: cfg.effective(&block),
            catalog: Arc::new(SqliteCatalog::open_in_memory().unwrap()),
            search: Arc::new(NullSearchIndex),
            cache: Arc::new(IndexedPathCache::load(None)),
            tagger: None,
            processor: None,
            ui: Arc::new(NullUi),
            stats: Arc::new(Stats::default()),
        }
    }

    fn base_record() -> Record {
        Record {
            id: "aaaaaaaa".to_string(),
            object: ObjectKind::Video,
            version: "1".to_string(),
            name: "a".to_string(),
            description: String::new(),
            hash: "bbbbbbbb".to_string(),
            sources: BTreeSet::from(["aaaaaaaa".to_string(), "bbbbbbbb".to_string()]),
            relative: "aa/aaaaaa.mp4".to_string(),
            thumbnail: None,
            preview: None,
            subtitles: None,
            size: 10,
            duration: None,
            aspect: None,
            width: None,
            height: None,
            sound: None,
            compression: None,
            metadata: Metadata::default(),
            deleted: false,
        }
    }

    #[test]
    fn duplicate_appends_new_occurrence_and_rebuilds_sources() {
        let ctx = ctx();
        let mut record = base_record();
        ctx.insert(&record).unwrap();

        duplicate(&ctx, ObjectKind::Video, &mut record, occ("cccccccc", "/in/b.mp4")).unwrap();

        assert_eq!(record.metadata.occurrences.len(), 1);
        assert!(record.sources.contains("cccccccc"));
        assert_eq!(ctx.stats.snapshot().duplicates, 1);

        let stored = ctx.lookup("cccccccc").unwrap().unwrap();
        assert_eq!(stored.id, "aaaaaaaa");
    }

    #[test]
    fn duplicate_does_not_double_append_same_file() {
        let ctx = ctx();
        let mut record = base_record();
        ctx.insert(&record).unwrap();

        duplicate(&ctx, ObjectKind::Video, &mut record, occ("cccccccc", "/in/b.mp4")).unwrap();
        duplicate(&ctx, ObjectKind::Video, &mut record, occ("cccccccc", "/in/b.mp4")).unwrap();

        assert_eq!(record.metadata.occurrences.len(), 1);
        assert_eq!(ctx.stats.snapshot().duplicates, 2);
    }

    #[test]
    fn skip_returns_true_only_when_cached_and_not_deleting() {
        let ctx = ctx();
        let path = Path::new("/in/a.mp4");
        assert!(!ctx.skip(ObjectKind::Video, path));

        ctx.mark_indexed("/in/a.mp4");
        assert!(ctx.skip(ObjectKind::Video, path));
        assert_eq!(ctx.stats.snapshot().skipped, 1);
    }

    #[test]
    fn tag_clears_existing_tags_when_drop_tags_is_set() {
        let mut ctx = ctx();
        ctx.effective.drop_tags = true;
        let mut record = base_record();
        record.metadata.tags = vec!["old".to_string()];

        ctx.tag(&mut record);

        assert!(record.metadata.tags.is_empty());
    }
}
