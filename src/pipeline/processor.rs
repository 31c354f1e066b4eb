//! BatchProcessor: pulls items from a source into a collector and submits every full batch
//! to the service, then drains.
//!
//! A run goes `Idle → Running → Draining → Done | Aborted`. Source errors, cancellation and
//! rejected submissions abort it; the partial collector is then flushed or discarded per
//! [`AbortPolicy`], and the run still waits for every batch it submitted before returning.

use log::{debug, error, info};
use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use super::emitter::BatchEmitter;
use super::source::{ItemSource, Pull};
use crate::collector::{
    AnyCollector, BatchContainer, Collector, ItemCountCollector, Weigher, WeightCollector,
};
use crate::engine::{BatchJob, BatchService, DynamicRateExecutor, Ledger, TaskObserver};
use crate::error::{BatchError, RunError};
use crate::types::{AbortPolicy, ProcessorState, RunReport, TallySnapshot};

pub type ListBatchProcessor<T, J> = BatchProcessor<ItemCountCollector<Vec<T>>, J>;
pub type SetBatchProcessor<T, J> = BatchProcessor<ItemCountCollector<HashSet<T>>, J>;
pub type OrderedSetBatchProcessor<T, J> = BatchProcessor<ItemCountCollector<BTreeSet<T>>, J>;
pub type WeightedBatchProcessor<T, J> = BatchProcessor<WeightCollector<Vec<T>>, J>;

/// Requests cancellation of the current run from another thread (e.g. a Ctrl+C handler).
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct BatchProcessor<C: Collector, J> {
    service: Arc<BatchService>,
    job: Arc<J>,
    /// Locked for the whole run, so runs on one processor never overlap.
    collector: Mutex<C>,
    rate: Option<Arc<DynamicRateExecutor>>,
    observers: Vec<Arc<dyn TaskObserver>>,
    cancel: CancelHandle,
    state: AtomicU8,
    run_ledger: Mutex<Arc<Ledger>>,
}

impl<C, J> BatchProcessor<C, J>
where
    C: Collector,
    J: BatchJob<C::Batch> + 'static,
{
    /// Processor over `service`. A dynamic rate executor is set up when the service options
    /// carry `rate`.
    pub fn new(service: Arc<BatchService>, collector: C, job: J) -> Result<Self, BatchError> {
        let rate = match &service.opts().rate {
            Some(r) => Some(Arc::new(DynamicRateExecutor::new(r.clone())?)),
            None => None,
        };
        Ok(Self {
            service,
            job: Arc::new(job),
            collector: Mutex::new(collector),
            rate,
            observers: Vec::new(),
            cancel: CancelHandle::default(),
            state: AtomicU8::new(ProcessorState::Idle.as_u8()),
            run_ledger: Mutex::new(Arc::new(Ledger::new())),
        })
    }

    /// Replace the rate executor (e.g. to share one across processors, or read its delay).
    pub fn with_rate(mut self, rate: Arc<DynamicRateExecutor>) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Extra observer told about every task this processor submits.
    pub fn with_observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn rate(&self) -> Option<&Arc<DynamicRateExecutor>> {
        self.rate.as_ref()
    }

    pub fn service(&self) -> &Arc<BatchService> {
        &self.service
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Live counters of the current (or last) run.
    pub fn progress(&self) -> TallySnapshot {
        self.run_ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .tally()
            .snapshot()
    }

    fn set_state(&self, s: ProcessorState) {
        self.state.store(s.as_u8(), Ordering::SeqCst);
    }

    /// Pull `source` dry, batching as it goes, and wait for every submitted batch.
    pub fn run<S>(&self, mut source: S) -> Result<RunReport, RunError>
    where
        S: ItemSource<Item = C::Item>,
    {
        let mut run = self.begin();
        let backoff = self.service.opts().retry_backoff;
        let cause = loop {
            if self.cancel.is_cancelled() {
                break Some(BatchError::Cancelled);
            }
            match source.pull() {
                Ok(Pull::Item(item)) => {
                    if let Err(e) = run.accept(item) {
                        break Some(e);
                    }
                }
                Ok(Pull::Retry) => thread::sleep(backoff),
                Ok(Pull::End) => break None,
                Err(e) => {
                    error!("Source failed: {:#}", e);
                    break Some(BatchError::Source(format!("{e:#}")));
                }
            }
        };
        run.finish(cause)
    }

    /// Push-style run: `produce` receives an emitter and pushes items into it. Returning an
    /// error aborts the run (a `BatchError` in the chain is kept as the cause, anything else
    /// becomes a source error).
    pub fn run_with_emitter<F>(&self, produce: F) -> Result<RunReport, RunError>
    where
        F: FnOnce(&mut BatchEmitter<'_, C, J>) -> anyhow::Result<()>,
    {
        let mut emitter = BatchEmitter::new(self.begin());
        let res = produce(&mut emitter);
        let cause = match res {
            Ok(()) => None,
            Err(e) => Some(match BatchError::find_in(&e) {
                Some(be) => be.clone(),
                None => {
                    error!("Producer failed: {:#}", e);
                    BatchError::Source(format!("{e:#}"))
                }
            }),
        };
        emitter.into_run().finish(cause)
    }

    fn begin(&self) -> ActiveRun<'_, C, J> {
        let mut collector = self.collector.lock().unwrap_or_else(|e| e.into_inner());
        // Leftovers of a run that unwound.
        drop(collector.take());

        let ledger = Arc::new(Ledger::new());
        *self.run_ledger.lock().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&ledger);

        let mut observers: Vec<Arc<dyn TaskObserver>> = Vec::new();
        if let Some(rate) = &self.rate {
            observers.push(Arc::clone(rate) as Arc<dyn TaskObserver>);
        }
        observers.extend(self.observers.iter().cloned());
        // Last, so the run's drain wait also covers the feedback observers.
        observers.push(Arc::clone(&ledger) as Arc<dyn TaskObserver>);

        self.set_state(ProcessorState::Running);
        debug!("Processor run started");
        ActiveRun {
            proc: self,
            collector,
            ledger,
            observers,
            started: Instant::now(),
        }
    }
}

/// State of one run, shared by `run` and the emitter.
pub(crate) struct ActiveRun<'p, C: Collector, J> {
    proc: &'p BatchProcessor<C, J>,
    collector: MutexGuard<'p, C>,
    ledger: Arc<Ledger>,
    observers: Vec<Arc<dyn TaskObserver>>,
    started: Instant,
}

impl<C, J> ActiveRun<'_, C, J>
where
    C: Collector,
    J: BatchJob<C::Batch> + 'static,
{
    pub fn is_cancelled(&self) -> bool {
        self.proc.cancel.is_cancelled()
    }

    pub fn progress(&self) -> TallySnapshot {
        self.ledger.tally().snapshot()
    }

    /// Add one item, submitting the batch if that filled the collector.
    pub fn accept(&mut self, item: C::Item) -> Result<(), BatchError> {
        self.ledger.tally().record_seen(1);
        self.proc.service.record_seen(1);
        if self.collector.accept(item) {
            self.submit_current()?;
        }
        Ok(())
    }

    /// Submit whatever the collector holds (nothing when empty).
    pub fn submit_current(&mut self) -> Result<(), BatchError> {
        if self.collector.is_empty() {
            return Ok(());
        }
        let batch = self.collector.take();
        let items = batch.len();
        if let Some(rate) = &self.proc.rate {
            rate.pace();
        }
        let tally = self.ledger.tally();
        tally.record_submitted(items);
        match self.proc.service.submit_observed(
            batch,
            Arc::clone(&self.proc.job),
            0,
            self.observers.clone(),
        ) {
            Ok(handle) => {
                debug!("Submitted batch {} ({} items)", handle.seq(), items);
                Ok(())
            }
            Err(e) => {
                tally.revert_submitted(items);
                Err(e)
            }
        }
    }

    /// Flush or discard the collector, wait for submitted batches, and build the report.
    pub fn finish(mut self, cause: Option<BatchError>) -> Result<RunReport, RunError> {
        let proc = self.proc;
        proc.set_state(ProcessorState::Draining);

        let cause = match cause {
            None => self.submit_current().err(),
            Some(c) => {
                match proc.service.opts().abort_policy {
                    AbortPolicy::Flush => {
                        if let Err(e) = self.submit_current() {
                            debug!("Partial batch not flushed: {}", e);
                        }
                    }
                    AbortPolicy::Discard => {
                        let dropped = self.collector.take().len();
                        if dropped > 0 {
                            debug!("Discarded partial batch of {} items", dropped);
                        }
                    }
                }
                Some(c)
            }
        };
        if let Some(c) = &cause {
            info!("Run aborting: {}", c);
        }

        let interval = proc.service.opts().drain_log_interval.max(Duration::from_millis(1));
        let tally = self.ledger.tally();
        while !tally.wait_idle(Some(interval)) {
            info!(
                "Waiting for {} batches to complete, please wait",
                tally.pending()
            );
        }

        let state = if cause.is_some() {
            ProcessorState::Aborted
        } else {
            ProcessorState::Done
        };
        let report = RunReport {
            state,
            counts: tally.snapshot(),
            failures: self.ledger.failures(),
            elapsed: self.started.elapsed(),
        };
        proc.cancel.reset();
        proc.set_state(state);
        match cause {
            None => {
                info!(
                    "Run done: {} items in {} batches ({} failed) in {:?}",
                    report.counts.items_seen,
                    report.counts.batches_submitted,
                    report.counts.batches_failed,
                    report.elapsed
                );
                Ok(report)
            }
            Some(cause) => Err(RunError { cause, report }),
        }
    }
}

impl<T, J> ListBatchProcessor<T, J>
where
    T: Send + 'static,
    J: BatchJob<Vec<T>> + 'static,
{
    /// Ordered batches of up to `capacity` items.
    pub fn list(service: Arc<BatchService>, capacity: usize, job: J) -> Result<Self, BatchError> {
        Self::new(service, ItemCountCollector::new(capacity)?, job)
    }
}

impl<T, J> SetBatchProcessor<T, J>
where
    T: Eq + Hash + Send + 'static,
    J: BatchJob<HashSet<T>> + 'static,
{
    /// Deduplicated batches of up to `capacity` distinct items.
    pub fn set(service: Arc<BatchService>, capacity: usize, job: J) -> Result<Self, BatchError> {
        Self::new(service, ItemCountCollector::new(capacity)?, job)
    }
}

impl<T, J> OrderedSetBatchProcessor<T, J>
where
    T: Ord + Send + 'static,
    J: BatchJob<BTreeSet<T>> + 'static,
{
    /// Deduplicated, sorted batches of up to `capacity` distinct items.
    pub fn ordered_set(
        service: Arc<BatchService>,
        capacity: usize,
        job: J,
    ) -> Result<Self, BatchError> {
        Self::new(service, ItemCountCollector::new(capacity)?, job)
    }
}

impl<T, J> WeightedBatchProcessor<T, J>
where
    T: Send + 'static,
    J: BatchJob<Vec<T>> + 'static,
{
    /// Batches that close once their summed weight reaches `max_weight`.
    pub fn weighted(
        service: Arc<BatchService>,
        max_weight: u64,
        weigher: Weigher<T>,
        job: J,
    ) -> Result<Self, BatchError> {
        Self::new(service, WeightCollector::new(max_weight, weigher)?, job)
    }
}

impl<B, J> BatchProcessor<AnyCollector<B>, J>
where
    B: BatchContainer,
    J: BatchJob<B> + 'static,
{
    /// Collector policy taken from the service's `batch_capacity`.
    pub fn from_opts(
        service: Arc<BatchService>,
        weigher: Option<Weigher<B::Item>>,
        job: J,
    ) -> Result<Self, BatchError> {
        let collector = AnyCollector::from_spec(service.opts().batch_capacity, weigher)?;
        Self::new(service, collector, job)
    }
}
