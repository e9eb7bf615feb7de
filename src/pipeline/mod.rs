pub mod image;
pub mod text;
pub mod video;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::IndexedPathCache;
use crate::catalog::Catalog;
use crate::common::PipelineContext;
use crate::config::Config;
use crate::error::IndexerError;
use crate::model::{ObjectKind, Occurrence};
use crate::scanner::ScannedFile;
use crate::search::SearchIndex;
use crate::slotpool::SlotPool;
use crate::stats::Stats;
use crate::ui::SlotUi;

/// Splits a hex fingerprint into its two-character shard prefix and the
/// remainder, per spec §6's `save/<id[0:2]>/<id[2:]>...` artifact layout.
pub fn shard(id: &str) -> (&str, &str) {
    if id.len() < 2 {
        (id, "")
    } else {
        id.split_at(2)
    }
}

pub fn canonical_directory(save: &Path, id: &str) -> PathBuf {
    let (prefix, _) = shard(id);
    save.join(prefix)
}

/// Renders `path` relative to `save` for storage in `Record::relative`,
/// using forward slashes regardless of platform.
pub fn relative_to_save(save: &Path, path: &Path) -> String {
    path.strip_prefix(save)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<(), IndexerError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        IndexerError::IOFailure {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<(), IndexerError> {
    Ok(())
}

pub fn mkdir_p(dir: &Path) -> Result<(), IndexerError> {
    std::fs::create_dir_all(dir).map_err(|e| IndexerError::IOFailure {
        path: dir.to_path_buf(),
        source: e,
    })
}

/// Builds the occurrence record for a freshly-scanned path: stat for
/// size/mtime, split name/extension from the path (spec §4.8 step 2).
pub fn occurrence_from_path(id: &str, path: &Path) -> std::io::Result<Occurrence> {
    let meta = std::fs::metadata(path)?;
    let modified = meta
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let timestamp = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    let abs = path.to_string_lossy().into_owned();
    let parent = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Occurrence {
        id: id.to_string(),
        file: abs,
        path: parent,
        name,
        extension,
        size: meta.len(),
        timestamp,
    })
}

/// Owns one resolved `PipelineContext` per media kind and routes scanned
/// files to the matching pipeline's `convert`. Generalizes the teacher's
/// single-kind `spawn_workers` dispatch (it only ever drove one
/// conversion routine) into a three-way match, one per spec §4.8–§4.10.
pub struct Pipelines {
    pub save_root: PathBuf,
    pub image: PipelineContext,
    pub text: PipelineContext,
    pub video: PipelineContext,
}

impl Pipelines {
    /// Builds one resolved `PipelineContext` per media kind, cascading
    /// each type block's config over the global `Config` (spec §9), all
    /// three sharing the same catalog/search/cache/ui/stats handles.
    /// Tagger and text-processor hooks are out of scope (spec §1's
    /// "user-supplied tagger hook and content processor hooks" are
    /// external collaborators referenced only by interface) so both are
    /// left unset here; wiring one in is a matter of constructing this
    /// struct directly instead of calling `new`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        catalog: Arc<dyn Catalog>,
        search: Arc<dyn SearchIndex>,
        cache: Arc<IndexedPathCache>,
        ui: Arc<dyn SlotUi>,
        stats: Arc<Stats>,
    ) -> Pipelines {
        let make = |block| PipelineContext {
            effective: config.effective(&block),
            catalog: catalog.clone(),
            search: search.clone(),
            cache: cache.clone(),
            tagger: None,
            processor: None,
            ui: ui.clone(),
            stats: stats.clone(),
        };

        Pipelines {
            save_root: config.save.clone(),
            image: make(config.image_block()),
            text: make(config.text_block()),
            video: make(config.video_block()),
        }
    }

    pub fn dispatch(&self, pool: &Arc<SlotPool>, slot: usize, file: ScannedFile) {
        let result = match file.kind {
            ObjectKind::Image => image::convert(&self.image, pool, slot, &self.save_root, &file.path),
            ObjectKind::Text => text::convert(&self.text, pool, slot, &self.save_root, &file.path),
            ObjectKind::Video => video::convert(&self.video, pool, slot, &self.save_root, &file.path),
        };
        if let Err(e) = result {
            log::error!("conversion failed for {}: {e}", file.path.display());
            match file.kind {
                ObjectKind::Image => self.image.stats.inc_failed(),
                ObjectKind::Text => self.text.stats.inc_failed(),
                ObjectKind::Video => self.video.stats.inc_failed(),
            }
        }
    }
}
