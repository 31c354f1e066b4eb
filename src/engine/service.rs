//! BatchService: a resizable worker pool behind a bounded task queue.
//!
//! Producers call [`BatchService::submit`], which blocks while the queue is full. Workers pull
//! tasks, run the job with panics caught, report the outcome to the task's observers, and
//! every `tuning_interval_tasks` completions let the tuner resize the pool.

use crossbeam_channel::SendTimeoutError;
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::pool::Shared;
use super::task::{BatchJob, Task, TaskHandle, TaskObserver};
use crate::collector::BatchContainer;
use crate::error::BatchError;
use crate::types::{BatchOpts, FailureRecord, TallySnapshot};
use crate::utils::config::QueueConsts;

/// Result of waiting on the service (`await_completion` / `shutdown`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompletionCounts {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub pending: usize,
    pub timed_out: bool,
}

impl CompletionCounts {
    fn from_snapshot(s: &TallySnapshot, timed_out: bool) -> Self {
        Self {
            completed: s.batches_completed,
            failed: s.batches_failed,
            cancelled: s.batches_cancelled,
            pending: s.batches_pending(),
            timed_out,
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Clone, Copy, Debug)]
pub struct ServiceSnapshot {
    /// Target worker count.
    pub pool_size: usize,
    /// Worker threads currently alive (may trail `pool_size` while shrinking).
    pub live_workers: usize,
    pub running: usize,
    pub queued: usize,
    /// Totals since the service started; `items_seen` sums the items accepted by every
    /// processor run on it.
    pub counts: TallySnapshot,
}

pub struct BatchService {
    shared: Arc<Shared>,
    shutdown_result: Mutex<Option<CompletionCounts>>,
}

impl BatchService {
    /// Validate `opts` and start `max_pool_size` workers; the tuner shrinks the pool from there.
    pub fn new(opts: BatchOpts) -> Result<Self, BatchError> {
        opts.validate()?;
        let initial = opts.max_pool_size;
        let min = opts.min_pool_size;
        let shared = Arc::new(Shared::new(opts));
        let service = Self {
            shared,
            shutdown_result: Mutex::new(None),
        };
        let started = {
            let mut pool = service.shared.lock_pool();
            let res = service.shared.resize_locked(&mut pool, initial);
            (res, pool.target)
        };
        match started {
            (Ok(()), n) => debug!("Batch service started with {} workers", n),
            (Err(e), n) if n >= min => warn!("{}; starting with {} workers", e, n),
            (Err(e), _) => {
                service.shutdown(false);
                return Err(e);
            }
        }
        Ok(service)
    }

    pub fn opts(&self) -> &BatchOpts {
        &self.shared.opts
    }

    /// Enqueue `batch` for `job`. Blocks while the queue is full.
    pub fn submit<B, J>(&self, batch: B, job: Arc<J>) -> Result<TaskHandle, BatchError>
    where
        B: BatchContainer,
        J: BatchJob<B> + ?Sized + 'static,
    {
        self.submit_observed(batch, job, 0, Vec::new())
    }

    /// [`submit`](Self::submit) with a priority and extra observers notified when the task
    /// finishes (before the service's own counters).
    pub fn submit_observed<B, J>(
        &self,
        batch: B,
        job: Arc<J>,
        priority: i32,
        observers: Vec<Arc<dyn TaskObserver>>,
    ) -> Result<TaskHandle, BatchError>
    where
        B: BatchContainer,
        J: BatchJob<B> + ?Sized + 'static,
    {
        let shared = &self.shared;
        if !shared.accepting.load(Ordering::SeqCst) {
            return Err(BatchError::Rejected);
        }
        let items = batch.len();
        let seq = shared.next_seq.fetch_add(1, Ordering::SeqCst);
        // The service ledger goes last so a drained tally means every observer has run.
        let mut all = observers;
        all.push(Arc::clone(&shared.ledger) as Arc<dyn TaskObserver>);
        let (mut task, handle) = Task::new(seq, priority, batch, items, job, all);

        let tally = shared.ledger.tally();
        tally.record_submitted(items);
        loop {
            let _gate = shared.gate.read().unwrap_or_else(|e| e.into_inner());
            if !shared.accepting.load(Ordering::SeqCst) {
                tally.revert_submitted(items);
                return Err(BatchError::Rejected);
            }
            match shared.tx.send_timeout(task, QueueConsts::SUBMIT_POLL) {
                Ok(()) => return Ok(handle),
                Err(SendTimeoutError::Timeout(t)) => task = t,
                Err(SendTimeoutError::Disconnected(_)) => {
                    tally.revert_submitted(items);
                    return Err(BatchError::Rejected);
                }
            }
        }
    }

    /// Block until every task submitted so far finished, or `timeout` elapsed.
    pub fn await_completion(&self, timeout: Option<Duration>) -> CompletionCounts {
        let tally = self.shared.ledger.tally();
        let drained = tally.wait_idle(timeout);
        CompletionCounts::from_snapshot(&tally.snapshot(), !drained)
    }

    /// Stop accepting work. Graceful lets queued and running tasks finish, escalating to a
    /// forced stop after `graceful_shutdown_timeout`; forced cancels queued tasks and flags
    /// running ones. Joins every worker. Later calls return the first call's counts.
    pub fn shutdown(&self, graceful: bool) -> CompletionCounts {
        let mut done = self
            .shutdown_result
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(counts) = *done {
            return counts;
        }
        let shared = &self.shared;
        {
            let _gate = shared.gate.write().unwrap_or_else(|e| e.into_inner());
            shared.accepting.store(false, Ordering::SeqCst);
        }
        shared.stopping.store(true, Ordering::SeqCst);

        let mut timed_out = false;
        if graceful {
            let limit = shared.opts.graceful_shutdown_timeout;
            if !shared.ledger.tally().wait_idle(Some(limit)) {
                warn!(
                    "Graceful shutdown did not finish within {:?}; cancelling remaining batches",
                    limit
                );
                timed_out = true;
                self.force();
            }
        } else {
            self.force();
        }

        self.join_workers();
        // Anything left behind by a worker that retired mid-drain.
        let late = shared.drain_queue();
        if late > 0 {
            debug!("Cancelled {} batches left after workers stopped", late);
        }

        let counts = CompletionCounts::from_snapshot(&shared.ledger.tally().snapshot(), timed_out);
        info!(
            "Batch service stopped: {} completed, {} failed, {} cancelled",
            counts.completed, counts.failed, counts.cancelled
        );
        *done = Some(counts);
        counts
    }

    fn force(&self) {
        let shared = &self.shared;
        shared.abort.store(true, Ordering::SeqCst);
        let n = shared.drain_queue();
        if n > 0 {
            info!("Cancelled {} queued batches", n);
        }
    }

    fn join_workers(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut self.shared.lock_pool().handles);
            if handles.is_empty() {
                return;
            }
            for h in handles {
                if h.join().is_err() {
                    warn!("Worker thread exited with a panic");
                }
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        !self.shared.accepting.load(Ordering::SeqCst)
    }

    /// Target pool size.
    pub fn pool_size(&self) -> usize {
        self.shared.lock_pool().target
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let shared = &self.shared;
        ServiceSnapshot {
            pool_size: self.pool_size(),
            live_workers: shared.live.load(Ordering::SeqCst),
            running: shared.running.load(Ordering::SeqCst),
            queued: shared.rx.len(),
            counts: shared.ledger.tally().snapshot(),
        }
    }

    /// Count items a processor accepted, across every run on this service.
    pub(crate) fn record_seen(&self, n: usize) {
        self.shared.ledger.tally().record_seen(n);
    }

    /// Failed batches recorded since the service started.
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.shared.ledger.failures()
    }
}

impl Drop for BatchService {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}
