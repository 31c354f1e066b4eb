//! Tasks: a batch moved into the pool together with the job that processes it.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::BatchError;

/// Processing logic run on a worker thread, once per batch.
///
/// Invocations run concurrently; implementations synchronise any state they share.
/// Return `BatchError::Cancelled` (e.g. through [`TaskContext::ensure_active`]) to report the
/// batch as cancelled rather than failed, and `BatchError::Overloaded` to ask a dynamic rate
/// executor to back off.
pub trait BatchJob<B>: Send + Sync {
    fn process(&self, batch: B, ctx: &TaskContext) -> anyhow::Result<()>;
}

impl<B, F> BatchJob<B> for F
where
    F: Fn(B, &TaskContext) -> anyhow::Result<()> + Send + Sync,
{
    fn process(&self, batch: B, ctx: &TaskContext) -> anyhow::Result<()> {
        self(batch, ctx)
    }
}

/// What a running job can see about its task.
pub struct TaskContext {
    seq: u64,
    cancel: Arc<AtomicBool>,
}

impl TaskContext {
    pub(crate) fn new(seq: u64, cancel: Arc<AtomicBool>) -> Self {
        Self { seq, cancel }
    }

    /// Submission sequence number of this batch (reorder downstream with it).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// True once a forced shutdown asked running tasks to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// `Err(BatchError::Cancelled)` once cancellation was requested; use with `?` in long jobs.
    pub fn ensure_active(&self) -> Result<(), BatchError> {
        if self.is_cancelled() {
            Err(BatchError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Final state of one task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed { elapsed: Duration },
    Failed { error: BatchError, elapsed: Duration },
    Cancelled,
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }

    /// Time spent running the job; `None` for tasks cancelled before they ran.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            TaskOutcome::Completed { elapsed } | TaskOutcome::Failed { elapsed, .. } => {
                Some(*elapsed)
            }
            TaskOutcome::Cancelled => None,
        }
    }
}

/// Passed to observers when a task reaches its final state.
pub struct TaskReport<'a> {
    pub seq: u64,
    pub items: usize,
    pub outcome: &'a TaskOutcome,
}

/// Hook for progress counters, metrics, and rate feedback. Called on the worker thread
/// (or the shutting-down thread for cancelled tasks); keep it fast.
pub trait TaskObserver: Send + Sync {
    fn on_finished(&self, report: &TaskReport<'_>);
}

type RunFn = Box<dyn FnOnce(&TaskContext) -> anyhow::Result<()> + Send>;

/// A batch plus its job, sequence number and priority, as it sits in the queue.
pub(crate) struct Task {
    pub seq: u64,
    pub priority: i32,
    pub items: usize,
    run: RunFn,
    observers: Vec<Arc<dyn TaskObserver>>,
    done_tx: Sender<TaskOutcome>,
}

impl Task {
    pub fn new<B, J>(
        seq: u64,
        priority: i32,
        batch: B,
        items: usize,
        job: Arc<J>,
        observers: Vec<Arc<dyn TaskObserver>>,
    ) -> (Self, TaskHandle)
    where
        B: Send + 'static,
        J: BatchJob<B> + ?Sized + 'static,
    {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let run: RunFn = Box::new(move |ctx: &TaskContext| job.process(batch, ctx));
        let task = Task {
            seq,
            priority,
            items,
            run,
            observers,
            done_tx,
        };
        let handle = TaskHandle {
            seq,
            items,
            done_rx,
        };
        (task, handle)
    }

    /// Consume the task, running the job. The caller turns the result into an outcome.
    pub fn take_run(self) -> (RunFn, Finisher) {
        let Task {
            seq,
            items,
            run,
            observers,
            done_tx,
            ..
        } = self;
        (
            run,
            Finisher {
                seq,
                items,
                observers,
                done_tx,
            },
        )
    }

    /// Finish without running (queued task cancelled by shutdown).
    pub fn cancel(self) -> (u64, usize) {
        let (_run, finisher) = self.take_run();
        let ids = (finisher.seq, finisher.items);
        finisher.finish(TaskOutcome::Cancelled);
        ids
    }
}

/// The part of a task that outlives its job: where the outcome goes.
pub(crate) struct Finisher {
    pub seq: u64,
    pub items: usize,
    observers: Vec<Arc<dyn TaskObserver>>,
    done_tx: Sender<TaskOutcome>,
}

impl Finisher {
    pub fn finish(self, outcome: TaskOutcome) {
        let report = TaskReport {
            seq: self.seq,
            items: self.items,
            outcome: &outcome,
        };
        for obs in &self.observers {
            obs.on_finished(&report);
        }
        // Handle may have been dropped; the outcome is already counted by the observers.
        let _ = self.done_tx.send(outcome);
    }
}

// Tasks order by priority (higher first), then by submission sequence.
impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq && self.priority == other.priority
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Returned by `submit`; resolves to the task's outcome.
pub struct TaskHandle {
    seq: u64,
    items: usize,
    done_rx: Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn items(&self) -> usize {
        self.items
    }

    /// Block until the task finished.
    pub fn wait(&self) -> TaskOutcome {
        self.done_rx.recv().unwrap_or(TaskOutcome::Cancelled)
    }

    /// Block up to `timeout`; `None` when the task is still queued or running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        match self.done_rx.recv_timeout(timeout) {
            Ok(o) => Some(o),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(TaskOutcome::Cancelled),
        }
    }

    /// Non-blocking check.
    pub fn try_outcome(&self) -> Option<TaskOutcome> {
        match self.done_rx.try_recv() {
            Ok(o) => Some(o),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(TaskOutcome::Cancelled),
        }
    }
}
