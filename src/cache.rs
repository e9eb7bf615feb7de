use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Process-wide set of absolute paths already successfully indexed,
/// persisted as a flat JSON array file. Loaded at start, rewritten on
/// graceful exit and on SIGINT (spec §3/§6). Mirrors the teacher's
/// `db::load_cache`-at-start discipline, but against a JSON file instead
/// of sqlite since this cache is a convenience duplicate of catalog
/// `sources`, not the catalog itself.
pub struct IndexedPathCache {
    path: Option<PathBuf>,
    paths: Mutex<HashSet<String>>,
}

impl IndexedPathCache {
    pub fn load(path: Option<&Path>) -> Self {
        let paths = path
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|text| serde_json::from_str::<Vec<String>>(&text).ok())
            .unwrap_or_default();

        IndexedPathCache {
            path: path.map(|p| p.to_path_buf()),
            paths: Mutex::new(paths.into_iter().collect()),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.lock().expect("cache mutex poisoned").contains(path)
    }

    pub fn mark(&self, path: String) {
        self.paths.lock().expect("cache mutex poisoned").insert(path);
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let paths = self.paths.lock().expect("cache mutex poisoned");
        let mut list: Vec<&String> = paths.iter().collect();
        list.sort();
        let text = serde_json::to_string_pretty(&list)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.paths.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.json");

        let cache = IndexedPathCache::load(Some(&cache_path));
        assert!(!cache.contains("/a/b"));
        cache.mark("/a/b".to_string());
        cache.flush().unwrap();

        let reloaded = IndexedPathCache::load(Some(&cache_path));
        assert!(reloaded.contains("/a/b"));
    }

    #[test]
    fn missing_file_starts_empty_without_error() {
        let cache = IndexedPathCache::load(Some(Path::new("/nonexistent/path/cache.json")));
        assert!(cache.is_empty());
    }
}
