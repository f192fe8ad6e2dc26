//! Process-wide progress counter and the visual display built from it

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

// NOTE: a single counter means at most one progress session can run per
// process. Starting a second session concurrently corrupts the totals. This
// is fine in practice but is not enforced.
static PROGRESS_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Add `bytes` to the shared progress counter.
pub fn update_progress(bytes: u64) {
    PROGRESS_COUNTER.fetch_add(bytes, Ordering::Relaxed);
}

/// Read the current progress total.
pub fn read_progress() -> u64 {
    PROGRESS_COUNTER.load(Ordering::Relaxed)
}

/// Overwrite the progress total. The work manager resets it to zero when a
/// session opens.
pub fn set_progress(value: u64) {
    PROGRESS_COUNTER.store(value, Ordering::Relaxed);
}

/// Configuration for the progress display of one work session.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Expected total, in `units`.
    pub total: u64,
    /// Unit label shown after the counts.
    pub units: String,
    /// Short title shown before the bar.
    pub title: String,
    /// Whether to render the bar at all.
    pub show: bool,
    /// How often the poller samples the counter.
    pub poll_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            total: 0,
            units: String::new(),
            title: String::new(),
            show: false,
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Build the progress bar for a session, hidden unless `config.show`.
pub(crate) fn progress_display(config: &ProgressConfig) -> ProgressBar {
    if !config.show {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(config.total);
    let template = format!(
        "{{prefix:>8}} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {units} ({{percent:>3}}%)",
        units = config.units
    );
    bar.set_style(ProgressStyle::with_template(&template).unwrap());
    bar.set_prefix(config.title.clone());
    bar
}
