use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::model::ObjectKind;
use crate::stats::Stats;

/// One classified file observation emitted by the scanner.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub index: u64,
    pub kind: ObjectKind,
    pub path: PathBuf,
}

struct TypeMatcher {
    kind: ObjectKind,
    enabled: bool,
    pattern: GlobSet,
    exclude: Option<GlobSet>,
}

fn build_globset(patterns: &[&str]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        builder.add(Glob::new(p)?);
    }
    Ok(builder.build()?)
}

/// Bounded-concurrency directory traversal. Spec §4.5.
///
/// The walk-and-classify shape follows the teacher's `WalkDir`-based
/// `find_src_files`; the explicit queue-of-`{directory, depth}` plus
/// `seen` set and worker-pool model is grounded in the pack's closest
/// reference, `other_examples/be47178a...indexer.rs.rs` (channel-fed
/// parallel walker).
pub struct Scanner {
    types: Vec<TypeMatcher>,
    global_exclude: GlobSet,
    recursive: bool,
    dotfiles: bool,
    sort: bool,
    max_depth: usize,
    follow_symlinks: bool,
    concurrency: usize,
    seen: Mutex<HashSet<PathBuf>>,
    counter: AtomicU64,
    /// The work queue backing the most recent `scan()` call, kept around
    /// so `idle()` (spec §4.5) can report queue idleness from any thread.
    queue: Mutex<Option<Arc<WorkQueue>>>,
}

struct QueueState {
    items: VecDeque<(PathBuf, usize)>,
    active: usize,
}

struct WorkQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl WorkQueue {
    fn new() -> Self {
        WorkQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                active: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn push(&self, item: (PathBuf, usize)) {
        let mut state = self.state.lock().expect("scan queue mutex poisoned");
        state.items.push_back(item);
        self.cond.notify_all();
    }

    /// Pops the next item, or returns `None` once the queue is drained
    /// and no worker is still processing something that might push more.
    fn pop(&self) -> Option<(PathBuf, usize)> {
        let mut state = self.state.lock().expect("scan queue mutex poisoned");
        loop {
            if let Some(item) = state.items.pop_front() {
                state.active += 1;
                return Some(item);
            }
            if state.active == 0 {
                return None;
            }
            state = self.cond.wait(state).expect("scan queue condvar poisoned");
        }
    }

    fn done_with(&self) {
        let mut state = self.state.lock().expect("scan queue mutex poisoned");
        state.active -= 1;
        self.cond.notify_all();
    }

    /// No items queued and no worker still processing one that might push
    /// more.
    fn is_idle(&self) -> bool {
        let state = self.state.lock().expect("scan queue mutex poisoned");
        state.items.is_empty() && state.active == 0
    }
}

impl Scanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        image_pattern: &str,
        image_exclude: Option<&str>,
        image_enabled: bool,
        text_pattern: &str,
        text_exclude: Option<&str>,
        text_enabled: bool,
        video_pattern: &str,
        video_exclude: Option<&str>,
        video_enabled: bool,
        global_exclude: &[String],
        recursive: bool,
        dotfiles: bool,
        sort: bool,
        max_depth: usize,
        follow_symlinks: bool,
        concurrency: usize,
    ) -> anyhow::Result<Self> {
        let make = |kind: ObjectKind, pattern: &str, exclude: Option<&str>, enabled: bool| -> anyhow::Result<TypeMatcher> {
            Ok(TypeMatcher {
                kind,
                enabled,
                pattern: build_globset(&[pattern])?,
                exclude: exclude.map(|e| build_globset(&[e])).transpose()?,
            })
        };

        let types = vec![
            make(ObjectKind::Image, image_pattern, image_exclude, image_enabled)?,
            make(ObjectKind::Text, text_pattern, text_exclude, text_enabled)?,
            make(ObjectKind::Video, video_pattern, video_exclude, video_enabled)?,
        ];

        let exclude_refs: Vec<&str> = global_exclude.iter().map(|s| s.as_str()).collect();
        let global_exclude = build_globset(&exclude_refs)?;

        Ok(Scanner {
            types,
            global_exclude,
            recursive,
            dotfiles,
            sort,
            max_depth,
            follow_symlinks,
            concurrency: concurrency.max(1),
            seen: Mutex::new(HashSet::new()),
            counter: AtomicU64::new(0),
            queue: Mutex::new(None),
        })
    }

    pub fn clear(&self) {
        self.seen.lock().expect("seen set mutex poisoned").clear();
        *self.queue.lock().expect("scanner queue handle mutex poisoned") = None;
    }

    /// `idle()` (spec §4.5): true once the queue backing the most recent
    /// `scan()` call has no items left and no worker is still processing
    /// one (or no scan has ever been started).
    pub fn idle(&self) -> bool {
        match self.queue.lock().expect("scanner queue handle mutex poisoned").as_ref() {
            Some(queue) => queue.is_idle(),
            None => true,
        }
    }

    /// Classify a single file path against the configured type patterns.
    /// Returns the first type whose `pattern` matches and whose `exclude`
    /// (if any) does not.
    fn classify(&self, path: &Path) -> Option<ObjectKind> {
        self.types.iter().find_map(|t| {
            if !t.enabled {
                return None;
            }
            if !t.pattern.is_match(path) {
                return None;
            }
            if let Some(exclude) = &t.exclude {
                if exclude.is_match(path) {
                    return None;
                }
            }
            Some(t.kind)
        })
    }

    /// Scans `roots`, spawning the scanner's own bounded worker pool on a
    /// background thread and streaming classified files back over the
    /// returned channel, which is ready to read from immediately. Mirrors
    /// the teacher's `rayon::spawn` + `mpsc::channel` fan-out
    /// (`main.rs::spawn_workers`), generalized to a directory-queue model
    /// with an explicit `seen` set.
    pub fn scan(
        self: &std::sync::Arc<Self>,
        roots: Vec<PathBuf>,
        stats: std::sync::Arc<Stats>,
    ) -> mpsc::Receiver<ScannedFile> {
        let (tx, rx) = mpsc::channel();
        let queue = Arc::new(WorkQueue::new());
        *self.queue.lock().expect("scanner queue handle mutex poisoned") = Some(queue.clone());

        for root in roots {
            let resolved = std::fs::canonicalize(&root).unwrap_or(root);
            let mut seen = self.seen.lock().expect("seen set mutex poisoned");
            if seen.insert(resolved.clone()) {
                drop(seen);
                queue.push((resolved, 0));
            }
        }

        let scanner = self.clone();
        std::thread::spawn(move || {
            let concurrency = scanner.concurrency;
            std::thread::scope(|scope| {
                for _ in 0..concurrency {
                    let queue = queue.clone();
                    let tx = tx.clone();
                    let stats = stats.clone();
                    let scanner = &scanner;
                    scope.spawn(move || {
                        while let Some((dir, depth)) = queue.pop() {
                            scanner.process_directory(&dir, depth, &queue, &tx, &stats);
                            queue.done_with();
                        }
                    });
                }
            });
        });

        rx
    }

    fn process_directory(
        &self,
        dir: &Path,
        depth: usize,
        queue: &WorkQueue,
        tx: &mpsc::Sender<ScannedFile>,
        stats: &Stats,
    ) {
        let recursive = self.recursive;
        let dotfiles = self.dotfiles;
        let sort = self.sort;
        let max_depth = self.max_depth;
        let follow_symlinks = self.follow_symlinks;

        stats.inc_directories();

        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                log::warn!("failed to read directory {}: {e}", dir.display());
                return;
            }
        };

        let mut names: Vec<PathBuf> = Vec::new();
        for entry in entries {
            match entry {
                Ok(e) => names.push(e.path()),
                Err(e) => log::warn!("directory entry error under {}: {e}", dir.display()),
            }
        }
        if sort {
            names.sort();
        }

        for path in names {
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if !dotfiles && file_name.starts_with('.') {
                continue;
            }

            let meta = match std::fs::symlink_metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("failed to stat {}: {e}", path.display());
                    continue;
                }
            };
            let is_symlink = meta.file_type().is_symlink();
            let is_dir_like = if is_symlink {
                std::fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false)
            } else {
                meta.is_dir()
            };

            if is_dir_like {
                if !recursive {
                    continue;
                }
                if is_symlink && !follow_symlinks {
                    continue;
                }
                let resolved = std::fs::canonicalize(&path).unwrap_or(path.clone());
                {
                    let mut seen = self.seen.lock().expect("seen set mutex poisoned");
                    if !seen.insert(resolved.clone()) {
                        continue;
                    }
                }
                if self.global_exclude.is_match(&resolved) {
                    continue;
                }
                if depth >= max_depth {
                    log::warn!(
                        "max depth reached at {}, not descending further",
                        resolved.display()
                    );
                    continue;
                }
                queue.push((resolved, depth + 1));
            } else {
                let resolved = std::fs::canonicalize(&path).unwrap_or(path.clone());
                {
                    let mut seen = self.seen.lock().expect("seen set mutex poisoned");
                    if !seen.insert(resolved.clone()) {
                        continue;
                    }
                }
                let Some(kind) = self.classify(&resolved) else {
                    continue;
                };
                stats.inc_files();
                let index = self.counter.fetch_add(1, Ordering::Relaxed);
                let _ = tx.send(ScannedFile {
                    index,
                    kind,
                    path: resolved,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn scanner(max_depth: usize) -> Arc<Scanner> {
        Arc::new(
            Scanner::new(
                "**/*.png",
                None,
                true,
                "**/*.txt",
                None,
                true,
                "**/*.mp4",
                None,
                true,
                &[],
                true,
                false,
                true,
                max_depth,
                false,
                2,
            )
            .unwrap(),
        )
    }

    #[test]
    fn classifies_files_by_type_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("c.bin"), b"x").unwrap();

        let s = scanner(usize::MAX);
        let rx = s.scan(vec![dir.path().to_path_buf()], Arc::new(Stats::default()));
        let mut found: Vec<ObjectKind> = rx.iter().map(|f| f.kind).collect();
        found.sort_by_key(|k| k.as_str());
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn dotfiles_are_skipped_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".hidden.png"), b"x").unwrap();

        let s = scanner(usize::MAX);
        let rx = s.scan(vec![dir.path().to_path_buf()], Arc::new(Stats::default()));
        let found: Vec<_> = rx.iter().collect();
        assert!(found.is_empty());
    }

    #[test]
    fn symlink_loop_terminates_and_visits_each_real_path_once() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("a.png"), b"x").unwrap();

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(dir.path(), sub.join("loop")).unwrap();
        }

        let s = scanner(usize::MAX);
        let rx = s.scan(vec![dir.path().to_path_buf()], Arc::new(Stats::default()));
        let found: Vec<_> = rx.iter().collect();
        assert_eq!(found.len(), 1, "the loop must not cause re-scanning or hang");
    }

    #[test]
    fn max_depth_emits_files_but_does_not_descend() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(dir.path().join("top.png"), b"x").unwrap();
        std::fs::write(sub.join("nested.png"), b"x").unwrap();

        let s = scanner(0);
        let rx = s.scan(vec![dir.path().to_path_buf()], Arc::new(Stats::default()));
        let found: Vec<_> = rx.iter().collect();
        assert_eq!(found.len(), 1, "only the top-level file should be emitted at depth 0");
    }

    #[test]
    fn idle_is_true_before_any_scan_and_after_the_channel_drains() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();

        let s = scanner(usize::MAX);
        assert!(s.idle(), "a scanner that has never scanned is idle");

        let rx = s.scan(vec![dir.path().to_path_buf()], Arc::new(Stats::default()));
        let _found: Vec<_> = rx.iter().collect();
        assert!(s.idle(), "queue must be idle once every directory has been processed");
    }
}
