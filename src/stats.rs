use std::sync::atomic::{AtomicU64, Ordering};

/// Run statistics. Counters are incremented from concurrent pipeline
/// tasks, so each field is an independent atomic rather than the
/// teacher's single-threaded `WorkStats` struct (`main.rs::WorkStats`),
/// which only ever saw updates from one consumer thread.
#[derive(Default)]
pub struct Stats {
    pub directories: AtomicU64,
    pub files: AtomicU64,

    pub images: AtomicU64,
    pub texts: AtomicU64,
    pub videos: AtomicU64,

    pub converted: AtomicU64,
    pub duplicates: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            directories: self.directories.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            images: self.images.load(Ordering::Relaxed),
            texts: self.texts.load(Ordering::Relaxed),
            videos: self.videos.load(Ordering::Relaxed),
            converted: self.converted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn inc_directories(&self) {
        self.directories.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_files(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_images(&self) {
        self.images.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_texts(&self) {
        self.texts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_videos(&self) {
        self.videos.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_converted(&self) {
        self.converted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub directories: u64,
    pub files: u64,
    pub images: u64,
    pub texts: u64,
    pub videos: u64,
    pub converted: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_from_multiple_threads() {
        let stats = std::sync::Arc::new(Stats::default());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = stats.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    stats.inc_converted();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.snapshot().converted, 800);
    }
}
