use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use crate::model::{Fingerprint, Occurrence};
use crate::scanner::ScannedFile;
use crate::ui::SlotUi;

struct Slot {
    id: Option<Fingerprint>,
    occurrences: Vec<Occurrence>,
}

/// Fixed-size vector of conversion slots (spec §4.6). One task owns one
/// slot for its entire lifetime; sibling tasks inspect each other's slot
/// under the pool lock to implement at-most-one-work-per-fingerprint
/// (spec §5.1). Generalizes the teacher's `spawn_workers` fan-out
/// (`rayon::spawn` + `mpsc::channel`), which has no notion of in-flight
/// occupancy because its dedup is purely post-hoc against sqlite.
pub struct SlotPool {
    slots: Vec<Mutex<Slot>>,
    /// Per-slot `{total, value}` progress in seconds, encoded via
    /// `f64::to_bits`, independent of any UI sink (spec §9 open question
    /// on deterministic progress testing).
    progress_total: Vec<AtomicU64>,
    progress_value: Vec<AtomicU64>,
    lock: Mutex<()>,
    ui: Arc<dyn SlotUi>,
}

impl SlotPool {
    pub fn new(concurrency: usize, ui: Arc<dyn SlotUi>) -> Self {
        let concurrency = concurrency.max(1);
        let slots = (0..concurrency)
            .map(|_| {
                Mutex::new(Slot {
                    id: None,
                    occurrences: Vec::new(),
                })
            })
            .collect();
        SlotPool {
            slots,
            progress_total: (0..concurrency).map(|_| AtomicU64::new(0)).collect(),
            progress_value: (0..concurrency).map(|_| AtomicU64::new(0)).collect(),
            lock: Mutex::new(()),
            ui,
        }
    }

    pub fn set_progress_total(&self, slot: usize, seconds: f64) {
        self.progress_total[slot].store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn set_progress_value(&self, slot: usize, seconds: f64) {
        self.progress_value[slot].store(seconds.to_bits(), Ordering::Relaxed);
    }

    /// Returns `(total, value)` in seconds for `slot`. `total` is `0.0`
    /// until the first `Duration:` line has been parsed.
    pub fn progress(&self, slot: usize) -> (f64, f64) {
        (
            f64::from_bits(self.progress_total[slot].load(Ordering::Relaxed)),
            f64::from_bits(self.progress_value[slot].load(Ordering::Relaxed)),
        )
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn ui(&self) -> &dyn SlotUi {
        self.ui.as_ref()
    }

    /// Registers `occurrence` under `id` on behalf of `own_slot`. If a
    /// sibling slot already owns `id`, the occurrence is appended there
    /// and `false` is returned — the caller must abandon its task,
    /// leaving exactly one slot to persist the work. Otherwise `own_slot`
    /// becomes the owner and `true` is returned.
    pub fn claim_or_join(&self, own_slot: usize, id: &Fingerprint, occurrence: Occurrence) -> bool {
        let _guard = self.lock.lock().expect("slot pool mutex poisoned");

        for (index, slot) in self.slots.iter().enumerate() {
            if index == own_slot {
                continue;
            }
            let mut s = slot.lock().expect("slot mutex poisoned");
            if s.id.as_ref() == Some(id) {
                s.occurrences.push(occurrence);
                return false;
            }
        }

        let mut mine = self.slots[own_slot].lock().expect("slot mutex poisoned");
        mine.id = Some(id.clone());
        mine.occurrences.push(occurrence);
        true
    }

    /// Drains every occurrence accumulated on `slot` (the owner's own
    /// plus anything appended by joiners) for inclusion into the final
    /// record, and clears the slot's `id` in the same critical section
    /// guarded by the pool lock used by `claim_or_join`. Without this, a
    /// sibling could observe the still-set `id` after the vector has
    /// already been drained, append an occurrence that nobody will ever
    /// persist, and silently lose it — closing the window here means a
    /// late joiner instead finds no owner and re-claims the fingerprint
    /// itself.
    pub fn drain_occurrences(&self, slot: usize) -> Vec<Occurrence> {
        let _guard = self.lock.lock().expect("slot pool mutex poisoned");
        let mut s = self.slots[slot].lock().expect("slot mutex poisoned");
        s.id = None;
        std::mem::take(&mut s.occurrences)
    }

    /// Releases `slot`: clears ownership and stops its UI row. Called
    /// whether the task succeeded or failed.
    pub fn release(&self, slot: usize) {
        {
            let mut s = self.slots[slot].lock().expect("slot mutex poisoned");
            s.id = None;
            s.occurrences.clear();
        }
        self.progress_total[slot].store(0, Ordering::Relaxed);
        self.progress_value[slot].store(0, Ordering::Relaxed);
        self.ui.stop(slot);
    }

    /// Runs `dispatch` against every item pulled off `rx`, fanning out
    /// across exactly `self.len()` permanently-indexed worker threads
    /// pulling from a shared, mutex-guarded receiver — the slot-pool
    /// analogue of the teacher's `rayon::spawn` + `mpsc::channel`
    /// fan-out. Blocks until `rx` is closed and every in-flight task has
    /// returned. `dispatch` is responsible for pipeline errors: per spec
    /// §7 those are absorbed and logged inside the pipeline, never
    /// propagated here.
    pub fn run_workers<F>(self: &Arc<Self>, rx: mpsc::Receiver<ScannedFile>, dispatch: F)
    where
        F: Fn(usize, ScannedFile) + Send + Sync,
    {
        let rx = Mutex::new(rx);
        let concurrency = self.len();
        std::thread::scope(|scope| {
            for slot in 0..concurrency {
                let rx = &rx;
                let pool = self;
                let dispatch = &dispatch;
                scope.spawn(move || loop {
                    let next = {
                        let rx = rx.lock().expect("scan channel mutex poisoned");
                        rx.recv()
                    };
                    let Ok(file) = next else { break };
                    dispatch(slot, file);
                    pool.release(slot);
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectKind;
    use crate::ui::NullUi;

    fn occ(id: &str, file: &str) -> Occurrence {
        Occurrence {
            id: id.to_string(),
            file: file.to_string(),
            path: "/".to_string(),
            name: file.to_string(),
            extension: "mp4".to_string(),
            size: 10,
            timestamp: 0,
        }
    }

    #[test]
    fn second_slot_joins_and_first_accumulates_both_occurrences() {
        let pool = SlotPool::new(4, Arc::new(NullUi));
        let id = "deadbeef".to_string();

        let owner = pool.claim_or_join(0, &id, occ(&id, "/a.mp4"));
        assert!(owner, "first claim on an empty pool must become the owner");

        let joined = pool.claim_or_join(1, &id, occ(&id, "/b.mp4"));
        assert!(!joined, "second claim for the same fingerprint must join, not own");

        let occurrences = pool.drain_occurrences(0);
        assert_eq!(occurrences.len(), 2);
        assert_eq!(occurrences[0].file, "/a.mp4");
        assert_eq!(occurrences[1].file, "/b.mp4");
    }

    #[test]
    fn release_clears_slot_for_reuse() {
        let pool = SlotPool::new(2, Arc::new(NullUi));
        let id = "cafef00d".to_string();
        pool.claim_or_join(0, &id, occ(&id, "/a.mp4"));
        pool.release(0);

        let other = "f00dcafe".to_string();
        let owner = pool.claim_or_join(0, &other, occ(&other, "/c.mp4"));
        assert!(owner);
        let occurrences = pool.drain_occurrences(0);
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].file, "/c.mp4");
    }

    #[test]
    fn progress_round_trips_through_bit_encoding_and_resets_on_release() {
        let pool = SlotPool::new(2, Arc::new(NullUi));
        assert_eq!(pool.progress(0), (0.0, 0.0));
        pool.set_progress_total(0, 12.5);
        pool.set_progress_value(0, 3.25);
        assert_eq!(pool.progress(0), (12.5, 3.25));
        pool.release(0);
        assert_eq!(pool.progress(0), (0.0, 0.0));
    }

    #[test]
    fn run_workers_drains_every_item_exactly_once() {
        let pool = Arc::new(SlotPool::new(2, Arc::new(NullUi)));
        let (tx, rx) = mpsc::channel();
        for i in 0..20u64 {
            tx.send(ScannedFile {
                index: i,
                kind: ObjectKind::Text,
                path: format!("/f{i}").into(),
            })
            .unwrap();
        }
        drop(tx);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_worker = seen.clone();
        pool.run_workers(rx, move |_slot, file| {
            seen_worker.lock().unwrap().push(file.index);
        });

        let mut indices = seen.lock().unwrap().clone();
        indices.sort();
        assert_eq!(indices, (0..20u64).collect::<Vec<_>>());
    }
}
