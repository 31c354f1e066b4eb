//! Shared counters for submitted / finished batches, with a condvar for drain waits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::task::{TaskObserver, TaskOutcome, TaskReport};
use crate::types::{FailureRecord, TallySnapshot};

/// Counters kept service-wide and per processor run.
///
/// Increments are lock-free; the mutex only backs the condvar that wakes drain waiters when
/// a task finishes.
#[derive(Default)]
pub struct Tally {
    items_seen: AtomicUsize,
    items_submitted: AtomicUsize,
    items_completed: AtomicUsize,
    items_failed: AtomicUsize,
    items_cancelled: AtomicUsize,
    batches_submitted: AtomicUsize,
    batches_completed: AtomicUsize,
    batches_failed: AtomicUsize,
    batches_cancelled: AtomicUsize,
    done_lock: Mutex<()>,
    done_cv: Condvar,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_seen(&self, n: usize) {
        self.items_seen.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_submitted(&self, items: usize) {
        self.items_submitted.fetch_add(items, Ordering::Relaxed);
        self.batches_submitted.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo a `record_submitted` whose enqueue did not go through.
    pub(crate) fn revert_submitted(&self, items: usize) {
        self.items_submitted.fetch_sub(items, Ordering::Relaxed);
        self.batches_submitted.fetch_sub(1, Ordering::SeqCst);
        self.notify();
    }

    pub fn record_finished(&self, outcome: &TaskOutcome, items: usize) {
        let (item_ctr, batch_ctr) = match outcome {
            TaskOutcome::Completed { .. } => (&self.items_completed, &self.batches_completed),
            TaskOutcome::Failed { .. } => (&self.items_failed, &self.batches_failed),
            TaskOutcome::Cancelled => (&self.items_cancelled, &self.batches_cancelled),
        };
        item_ctr.fetch_add(items, Ordering::Relaxed);
        batch_ctr.fetch_add(1, Ordering::SeqCst);
        self.notify();
    }

    fn notify(&self) {
        // Taking the lock orders this wake-up after any waiter's pending-check.
        let _guard = self.done_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.done_cv.notify_all();
    }

    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            items_seen: self.items_seen.load(Ordering::Relaxed),
            items_submitted: self.items_submitted.load(Ordering::Relaxed),
            items_completed: self.items_completed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            items_cancelled: self.items_cancelled.load(Ordering::Relaxed),
            batches_submitted: self.batches_submitted.load(Ordering::SeqCst),
            batches_completed: self.batches_completed.load(Ordering::SeqCst),
            batches_failed: self.batches_failed.load(Ordering::SeqCst),
            batches_cancelled: self.batches_cancelled.load(Ordering::SeqCst),
        }
    }

    /// Batches submitted but not finished.
    pub fn pending(&self) -> usize {
        self.snapshot().batches_pending()
    }

    /// Block until nothing is pending or `timeout` elapses. Returns true when drained.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        // A timeout too large to represent is the same as none.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut guard = self.done_lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if self.pending() == 0 {
                return true;
            }
            guard = match deadline {
                None => self.done_cv.wait(guard).unwrap_or_else(|e| e.into_inner()),
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return false;
                    }
                    self.done_cv
                        .wait_timeout(guard, d - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
    }
}

impl TaskObserver for Tally {
    fn on_finished(&self, report: &TaskReport<'_>) {
        self.record_finished(report.outcome, report.items);
    }
}

/// A [`Tally`] plus the failure log, observed together.
#[derive(Default)]
pub struct Ledger {
    tally: Tally,
    failures: Mutex<Vec<FailureRecord>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    /// Failed batches recorded so far, in completion order.
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl TaskObserver for Ledger {
    fn on_finished(&self, report: &TaskReport<'_>) {
        if let TaskOutcome::Failed { error, .. } = report.outcome {
            self.failures
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(FailureRecord {
                    seq: report.seq,
                    items: report.items,
                    message: error.to_string(),
                });
        }
        // Counters last: a drain waiter woken by them sees the failure already logged.
        self.tally.on_finished(report);
    }
}
