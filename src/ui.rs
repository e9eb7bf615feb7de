use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Side-effect sink for per-slot progress feedback (spinner, scrolling
/// name). Spec §4.7/§9 treats UI as something the core writes to via a
/// small interface; tests use `NullUi`.
pub trait SlotUi: Send + Sync {
    fn spinner(&self, slot: usize, format: &str, name: &str);
    fn set_message(&self, slot: usize, message: &str);
    fn stop(&self, slot: usize);

    /// Restores the terminal immediately, e.g. from a SIGINT handler
    /// (spec §5 graceful-cancel path). No-op unless overridden.
    fn shutdown(&self) {}
}

pub struct NullUi;

impl SlotUi for NullUi {
    fn spinner(&self, _slot: usize, _format: &str, _name: &str) {}
    fn set_message(&self, _slot: usize, _message: &str) {}
    fn stop(&self, _slot: usize) {}
}

/// Terminal implementation: one row per slot in a `MultiProgress` group,
/// following the pack's `indicatif` convention
/// (`other_examples/be47178a...indexer.rs.rs`'s `MultiProgress`/`ProgressBar`
/// usage) generalized from one-bar-per-root to one-spinner-per-slot.
pub struct TerminalUi {
    multi: MultiProgress,
    bars: Vec<ProgressBar>,
}

impl TerminalUi {
    pub fn new(slots: usize) -> Self {
        let multi = MultiProgress::new();
        let style = ProgressStyle::with_template("{spinner:.green} [{prefix}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bars = (0..slots)
            .map(|i| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(style.clone());
                bar.set_prefix(i.to_string());
                bar
            })
            .collect();
        TerminalUi { multi, bars }
    }
}

impl SlotUi for TerminalUi {
    fn spinner(&self, slot: usize, format: &str, name: &str) {
        if let Some(bar) = self.bars.get(slot) {
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            bar.set_message(format!("{format}: {name}"));
        }
    }

    fn set_message(&self, slot: usize, message: &str) {
        if let Some(bar) = self.bars.get(slot) {
            bar.set_message(message.to_string());
        }
    }

    fn stop(&self, slot: usize) {
        if let Some(bar) = self.bars.get(slot) {
            bar.disable_steady_tick();
            bar.set_message("idle");
        }
    }

    fn shutdown(&self) {
        for bar in &self.bars {
            bar.finish_and_clear();
        }
        let _ = self.multi.clear();
    }
}

impl Drop for TerminalUi {
    fn drop(&mut self) {
        for bar in &self.bars {
            bar.finish_and_clear();
        }
        let _ = self.multi.clear();
    }
}

/// Produces a scrolling fixed-width rendering of `name`, per spec §4.7
/// `nameScroller`. Deterministic given `tick` so tests can assert output.
pub fn name_scroller(name: &str, width: usize, tick: usize) -> String {
    if name.len() <= width {
        return format!("{:<width$}", name, width = width);
    }
    let padded = format!("{name}   ");
    let chars: Vec<char> = padded.chars().collect();
    let offset = tick % chars.len();
    let mut rotated: Vec<char> = chars[offset..].to_vec();
    rotated.extend_from_slice(&chars[..offset]);
    rotated.into_iter().take(width).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_scroller_pads_short_names() {
        let out = name_scroller("ab", 5, 0);
        assert_eq!(out, "ab   ");
    }

    #[test]
    fn name_scroller_rotates_long_names_over_ticks() {
        let a = name_scroller("a_much_longer_name", 6, 0);
        let b = name_scroller("a_much_longer_name", 6, 1);
        assert_ne!(a, b);
        assert_eq!(a.len(), 6);
        assert_eq!(b.len(), 6);
    }
}
