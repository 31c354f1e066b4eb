//! Progress counter for the CLI, fed by task outcomes.

use kdam::{Animation, Bar, BarExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{TaskObserver, TaskReport};
use crate::utils::config::PROGRESS_UPDATE_BATCH_SIZE;

pub type ProgressBar = Arc<Mutex<Bar>>;

/// Create a counter for unknown total (shows count without percentage)
pub fn create_counter(desc: &'static str) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = 0,
        desc = desc,
        animation = Animation::Classic,
        position = 0,
        unit = " lines"
    )))
}

/// Update progress bar if available.
/// Uses try_lock to avoid blocking workers; a contended update is folded into the next one.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) -> bool {
    if let Ok(mut pb) = pb.try_lock() {
        let _ = pb.update(n);
        true
    } else {
        false
    }
}

/// Force a refresh of the bar (e.g. so the counter shows the final count).
pub fn refresh_bar(pb: &ProgressBar) {
    if let Ok(mut bar) = pb.lock() {
        let _ = bar.refresh();
    }
}

/// Counts items of finished batches and pushes them to the bar in chunks.
pub struct ProgressObserver {
    bar: ProgressBar,
    unreported: AtomicUsize,
}

impl ProgressObserver {
    pub fn new(bar: ProgressBar) -> Self {
        Self {
            bar,
            unreported: AtomicUsize::new(0),
        }
    }

    /// Push whatever is still buffered (call once the run is over).
    pub fn flush(&self) {
        let n = self.unreported.swap(0, Ordering::Relaxed);
        if n > 0
            && let Ok(mut bar) = self.bar.lock()
        {
            let _ = bar.update(n);
        }
        refresh_bar(&self.bar);
    }
}

impl TaskObserver for ProgressObserver {
    fn on_finished(&self, report: &TaskReport<'_>) {
        let pending = self.unreported.fetch_add(report.items, Ordering::Relaxed) + report.items;
        if pending >= PROGRESS_UPDATE_BATCH_SIZE {
            let n = self.unreported.swap(0, Ordering::Relaxed);
            if n > 0 && !update_progress_bar(&self.bar, n) {
                self.unreported.fetch_add(n, Ordering::Relaxed);
            }
        }
    }
}
