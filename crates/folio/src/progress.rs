//! 📊 progress.rs: "Are we there yet?" Every OCR run, every time, forever.
//!
//! 🚀 Chunks done, pages read, how many came back as text and how many came back
//! as regret. Plus a guess at how long until the last page. The guess assumes the
//! future looks like the past, which for a single-seat GPU is actually fair.
//!
//! ⚠️ Watching this progress bar will not make the model read faster.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::Instant;

use crate::common::RequestOutcome;

/// 🔢 "1000000 pages" → "1,000,000 pages". If you're OCRing a million pages, godspeed.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS or HH:MM:SS. If it shows HH, the book was long. Or the GPU was sad.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 Running tally of one dispatch run, rendered to the terminal as it goes.
///
/// # Ancient Proverb
/// "He who OCRs a 900-page manual without a progress bar, OCRs alone and in darkness."
pub(crate) struct ProgressMetrics {
    /// 🏷️ usually the model name, shown above the bar
    label: String,
    total_chunks: u64,
    total_items: u64,
    chunks_done: u64,
    items_done: u64,
    successes: u64,
    failures: u64,
    progress_bar: ProgressBar,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ProgressMetrics")
            .field("label", &self.label)
            .field("total_chunks", &self.total_chunks)
            .field("chunks_done", &self.chunks_done)
            .field("successes", &self.successes)
            .field("failures", &self.failures)
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 `visible = false` gives a hidden bar: all the bookkeeping, none of the terminal.
    pub(crate) fn new(label: String, total_chunks: usize, total_items: usize, visible: bool) -> Self {
        let progress_bar = if visible {
            ProgressBar::new(total_chunks as u64)
        } else {
            ProgressBar::hidden()
        };
        // -- 🐛 hardcoded template, so the only way this fails is a typo we'd see immediately
        if let Ok(style) = ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}] {pos}/{len} chunks") {
            progress_bar.set_style(style.progress_chars("=>-"));
        }

        Self {
            label,
            total_chunks: total_chunks as u64,
            total_items: total_items as u64,
            chunks_done: 0,
            items_done: 0,
            successes: 0,
            failures: 0,
            progress_bar,
            start_time: Instant::now(),
        }
    }

    /// 🔄 Count one finished chunk and redraw.
    pub(crate) fn update(&mut self, outcome: &RequestOutcome) {
        self.chunks_done += 1;
        self.items_done += outcome.item_count as u64;
        if outcome.is_success() {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.render();
        self.progress_bar.set_position(self.chunks_done);
    }

    /// 🔮 Average time per finished chunk so far, times the chunks still waiting.
    /// `None` before the first chunk lands, because extrapolating from zero is astrology.
    pub(crate) fn estimated_remaining(&self) -> Option<Duration> {
        if self.chunks_done == 0 {
            return None;
        }
        let per_chunk = self.start_time.elapsed().as_secs_f64() / self.chunks_done as f64;
        let left = self.total_chunks.saturating_sub(self.chunks_done) as f64;
        Some(Duration::from_secs_f64(per_chunk * left))
    }

    /// ✅ Ring the bell.
    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    /// 🎨 Two columns, no borders, slammed into the bar's message.
    fn render(&self) {
        let remaining = self
            .estimated_remaining()
            .map(format_duration)
            .unwrap_or_else(|| "--:--".to_string());

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!(
                "{} / {} pages",
                format_number(self.items_done),
                format_number(self.total_items)
            ))
            .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} chunks", format_number(self.chunks_done))).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("✅ {}", format_number(self.successes))).set_alignment(CellAlignment::Right),
            Cell::new(format!("💀 {}", format_number(self.failures))).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(self.start_time.elapsed())))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} remaining", remaining)).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar.set_message(format!("model: {}\n{}", self.label, table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::OutcomeStatus;

    fn an_outcome(ok: bool, item_count: usize) -> RequestOutcome {
        RequestOutcome {
            chunk_index: 0,
            item_ids: Vec::new(),
            item_count,
            status: if ok {
                OutcomeStatus::Success { text: "t".into() }
            } else {
                OutcomeStatus::Failure { error: "e".into() }
            },
            attempts: 1,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn the_one_where_numbers_get_their_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn the_one_where_durations_learn_to_tell_time() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_eta_is_just_the_past_repeated() {
        let mut progress = ProgressMetrics::new("m".into(), 4, 17, false);
        assert_eq!(progress.estimated_remaining(), None);

        tokio::time::sleep(Duration::from_secs(10)).await;
        progress.update(&an_outcome(true, 5));
        tokio::time::sleep(Duration::from_secs(10)).await;
        progress.update(&an_outcome(false, 5));

        assert_eq!(progress.estimated_remaining(), Some(Duration::from_secs(20)));
        assert_eq!((progress.successes, progress.failures, progress.items_done), (1, 1, 10));
        progress.finish();
    }
}
