//! Worker threads, the state they share, and pool resizing.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::tally::Ledger;
use super::task::{Task, TaskContext, TaskOutcome};
use super::tuner::{self, TuningInput};
use crate::error::BatchError;
use crate::types::BatchOpts;
use crate::utils::config::{PackageNames, QueueConsts};

/// Everything under the pool lock.
pub(crate) struct PoolState {
    pub target: usize,
    pub min: usize,
    pub max: usize,
    pub last_resize: Instant,
    pub samples: VecDeque<Duration>,
    pub busy: Duration,
    pub window_start: Instant,
    pub since_tune: usize,
    pub handles: Vec<JoinHandle<()>>,
    next_worker_id: usize,
}

impl PoolState {
    fn new(opts: &BatchOpts) -> Self {
        let now = Instant::now();
        Self {
            target: 0,
            min: opts.min_pool_size,
            max: opts.max_pool_size,
            last_resize: now,
            samples: VecDeque::with_capacity(opts.tuning_window),
            busy: Duration::ZERO,
            window_start: now,
            since_tune: 0,
            handles: Vec::new(),
            next_worker_id: 0,
        }
    }
}

/// State shared by the service handle and every worker.
pub(crate) struct Shared {
    pub opts: BatchOpts,
    pub tx: Sender<Task>,
    pub rx: Receiver<Task>,
    /// Held for reading around each enqueue; shutdown takes it for writing to close the door.
    pub gate: RwLock<()>,
    pub accepting: AtomicBool,
    /// Workers leave once the queue runs dry.
    pub stopping: AtomicBool,
    /// Forced shutdown: running jobs see it through `TaskContext`, dequeued tasks are cancelled.
    pub abort: Arc<AtomicBool>,
    pub next_seq: AtomicU64,
    /// Mirror of `PoolState::target`, read by workers without the pool lock.
    pub target: AtomicUsize,
    pub live: AtomicUsize,
    pub running: AtomicUsize,
    pub ledger: Arc<Ledger>,
    pub pool: Mutex<PoolState>,
}

impl Shared {
    pub fn new(opts: BatchOpts) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(opts.queue_capacity);
        let pool = Mutex::new(PoolState::new(&opts));
        Self {
            opts,
            tx,
            rx,
            gate: RwLock::new(()),
            accepting: AtomicBool::new(true),
            stopping: AtomicBool::new(false),
            abort: Arc::new(AtomicBool::new(false)),
            next_seq: AtomicU64::new(0),
            target: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            ledger: Arc::new(Ledger::new()),
            pool,
        }
    }

    pub fn lock_pool(&self) -> MutexGuard<'_, PoolState> {
        self.pool.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cancel everything still queued, higher priority and older tasks first.
    pub fn drain_queue(&self) -> usize {
        let mut drained: Vec<Task> = self.rx.try_iter().collect();
        drained.sort();
        let n = drained.len();
        for task in drained {
            let (seq, _) = task.cancel();
            debug!("Cancelled queued batch {}", seq);
        }
        n
    }

    /// Claim a retirement slot when more workers are alive than the target asks for.
    fn try_retire(&self) -> bool {
        let mut live = self.live.load(Ordering::SeqCst);
        loop {
            if live <= self.target.load(Ordering::SeqCst) {
                return false;
            }
            match self
                .live
                .compare_exchange(live, live - 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => live = actual,
            }
        }
    }

    fn execute(self: &Arc<Self>, task: Task) {
        if self.abort.load(Ordering::SeqCst) {
            task.cancel();
            return;
        }
        self.running.fetch_add(1, Ordering::SeqCst);
        let (run, finisher) = task.take_run();
        let seq = finisher.seq;
        let ctx = TaskContext::new(seq, Arc::clone(&self.abort));

        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| run(&ctx)));
        let elapsed = start.elapsed();

        let outcome = match result {
            Ok(Ok(())) => TaskOutcome::Completed { elapsed },
            Ok(Err(e)) => match BatchError::find_in(&e) {
                Some(BatchError::Cancelled) => TaskOutcome::Cancelled,
                _ if ctx.is_cancelled() => TaskOutcome::Cancelled,
                Some(be) if be.is_overload() => TaskOutcome::Failed {
                    error: be.clone(),
                    elapsed,
                },
                _ => TaskOutcome::Failed {
                    error: BatchError::Processing {
                        seq,
                        message: format!("{e:#}"),
                    },
                    elapsed,
                },
            },
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Batch {} panicked: {}", seq, message);
                TaskOutcome::Failed {
                    error: BatchError::Processing {
                        seq,
                        message: format!("panicked: {message}"),
                    },
                    elapsed,
                }
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);

        if let TaskOutcome::Failed { error, .. } = &outcome {
            warn!("{}", error);
        }
        let tune = !outcome.is_cancelled() && self.record_timing(elapsed);
        finisher.finish(outcome);
        if tune {
            self.tune();
        }
    }

    /// Add one completion sample. Returns true when a tuning pass is due.
    fn record_timing(&self, elapsed: Duration) -> bool {
        let mut pool = self.lock_pool();
        if self.opts.tuning_window > 0 {
            if pool.samples.len() >= self.opts.tuning_window {
                pool.samples.pop_front();
            }
            pool.samples.push_back(elapsed);
        }
        pool.busy += elapsed;
        pool.since_tune += 1;
        let interval = self.opts.tuning_interval_tasks;
        interval > 0 && pool.since_tune >= interval
    }

    /// Ask the tuner for a size and apply it when it moves far enough.
    fn tune(self: &Arc<Self>) {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        let mut pool = self.lock_pool();
        // Another worker may have run this pass already.
        if pool.since_tune < self.opts.tuning_interval_tasks.max(1) {
            return;
        }
        pool.since_tune = 0;
        let window = pool.window_start.elapsed();
        let workers = self.live.load(Ordering::SeqCst).max(1);
        let utilisation = if window.is_zero() {
            1.0
        } else {
            (pool.busy.as_secs_f64() / (window.as_secs_f64() * workers as f64)).min(1.0)
        };
        let samples: Vec<Duration> = pool.samples.iter().copied().collect();
        let input = TuningInput {
            samples: &samples,
            current: pool.target,
            min: pool.min,
            max: pool.max,
            queue_depth: self.rx.len(),
            queue_capacity: self.opts.queue_capacity,
            utilisation,
        };
        let recommended = tuner::recommend(&input);
        pool.busy = Duration::ZERO;
        pool.window_start = Instant::now();

        let running = self.running.load(Ordering::SeqCst);
        let floor = running.max(pool.min).min(pool.max);
        let next = recommended.max(floor);
        let current = pool.target;
        if next == current || next.abs_diff(current) < self.opts.resize_hysteresis {
            return;
        }
        info!(
            "Resizing pool {} -> {} (utilisation {:.2}, queue {}/{})",
            current,
            next,
            utilisation,
            input.queue_depth,
            self.opts.queue_capacity
        );
        if let Err(e) = self.resize_locked(&mut pool, next) {
            warn!("{}; keeping {} workers", e, pool.target);
        }
    }

    /// Move the pool toward `size`. Shrinking lets surplus workers retire on their next poll.
    pub fn resize_locked(
        self: &Arc<Self>,
        pool: &mut PoolState,
        size: usize,
    ) -> Result<(), BatchError> {
        pool.last_resize = Instant::now();
        if size <= pool.target {
            pool.target = size;
            self.target.store(size, Ordering::SeqCst);
            return Ok(());
        }
        pool.handles.retain(|h| !h.is_finished());
        while pool.target < size {
            let id = pool.next_worker_id;
            pool.next_worker_id += 1;
            // Target first, then live: a running worker must never see live > target here.
            self.target.store(pool.target + 1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            let shared = Arc::clone(self);
            let mut builder =
                thread::Builder::new().name(PackageNames::get().worker_thread_name(id));
            if let Some(bytes) = self.opts.worker_stack_size {
                builder = builder.stack_size(bytes);
            }
            let spawned = builder.spawn(move || worker_loop(shared));
            match spawned {
                Ok(handle) => {
                    pool.handles.push(handle);
                    pool.target += 1;
                }
                Err(e) => {
                    self.live.fetch_sub(1, Ordering::SeqCst);
                    self.target.store(pool.target, Ordering::SeqCst);
                    return Err(BatchError::Resize(format!(
                        "failed to spawn worker {id}: {e}"
                    )));
                }
            }
        }
        debug!("Pool now at {} workers", pool.target);
        Ok(())
    }
}

/// Decrements the live counter when a worker leaves, unless retirement already did.
struct LiveGuard<'a> {
    live: &'a AtomicUsize,
    counted: bool,
}

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        if self.counted {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let mut guard = LiveGuard {
        live: &shared.live,
        counted: true,
    };
    loop {
        if shared.try_retire() {
            guard.counted = false;
            debug!("Worker retiring");
            return;
        }
        match shared.rx.recv_timeout(QueueConsts::WORKER_IDLE_POLL) {
            Ok(task) => shared.execute(task),
            Err(RecvTimeoutError::Timeout) => {
                if shared.stopping.load(Ordering::SeqCst) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
