//! Public types for the batchwerk API: options, run states and reports.

use serde::Deserialize;
use std::time::Duration;

use crate::error::BatchError;
use crate::utils::config::{
    DEFAULT_BATCH_ITEMS, PoolLimits, QueueConsts, RateConsts, RunConsts, TuningConsts,
};

/// How a collector decides it is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorSpec {
    /// Full when the batch holds this many items.
    Items(usize),
    /// Full when the summed item weight reaches this value.
    Weight(u64),
}

impl Default for CollectorSpec {
    fn default() -> Self {
        CollectorSpec::Items(DEFAULT_BATCH_ITEMS)
    }
}

/// What an aborted run does with the partially filled collector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Submit the partial batch before stopping.
    Flush,
    /// Drop the partial batch (its items count as seen but never submitted).
    #[default]
    Discard,
}

/// Options for the dynamic rate executor.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateOpts {
    /// Lower bound of the inter-submission delay.
    #[serde(with = "millis")]
    pub rate_min: Duration,
    /// Upper bound of the inter-submission delay.
    #[serde(with = "millis")]
    pub rate_max: Duration,
    /// Multiplier applied after a success, in (0, 1).
    pub rate_decay_factor: f64,
    /// Multiplier applied after an overload failure, > 1.
    pub rate_growth_factor: f64,
}

impl Default for RateOpts {
    fn default() -> Self {
        Self {
            rate_min: RateConsts::MIN_DELAY,
            rate_max: RateConsts::MAX_DELAY,
            rate_decay_factor: RateConsts::DECAY_FACTOR,
            rate_growth_factor: RateConsts::GROWTH_FACTOR,
        }
    }
}

impl RateOpts {
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.rate_min > self.rate_max {
            return Err(BatchError::config(format!(
                "rate_min ({:?}) is above rate_max ({:?})",
                self.rate_min, self.rate_max
            )));
        }
        if !(self.rate_decay_factor > 0.0 && self.rate_decay_factor < 1.0) {
            return Err(BatchError::config(format!(
                "rate_decay_factor must be in (0, 1), got {}",
                self.rate_decay_factor
            )));
        }
        if !(self.rate_growth_factor > 1.0 && self.rate_growth_factor.is_finite()) {
            return Err(BatchError::config(format!(
                "rate_growth_factor must be > 1, got {}",
                self.rate_growth_factor
            )));
        }
        Ok(())
    }
}

/// Full option set for a service and the processors running on it.
///
/// Every field has a default; `.batchwerk.toml` and the CLI only override what they name.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatchOpts {
    /// Pool never shrinks below this many workers.
    pub min_pool_size: usize,
    /// Pool never grows above this many workers.
    pub max_pool_size: usize,
    /// Bounded task queue size; `submit` blocks when it is full.
    pub queue_capacity: usize,
    /// Collector fullness policy.
    pub batch_capacity: CollectorSpec,
    /// Completions between two tuning passes (0 disables tuning).
    pub tuning_interval_tasks: usize,
    /// Completion-time samples handed to the tuner.
    pub tuning_window: usize,
    /// Minimum size delta before a recommendation is applied.
    pub resize_hysteresis: usize,
    /// Dynamic submission throttling; `None` submits as fast as the queue allows.
    pub rate: Option<RateOpts>,
    /// Graceful shutdown escalates to forced cancellation after this long.
    #[serde(with = "millis")]
    pub graceful_shutdown_timeout: Duration,
    pub abort_policy: AbortPolicy,
    /// Pause after a source reports a transient empty condition.
    #[serde(with = "millis")]
    pub retry_backoff: Duration,
    /// Interval of the "waiting for batches" log line while draining.
    #[serde(with = "millis")]
    pub drain_log_interval: Duration,
    /// Stack size of worker threads; `None` keeps the platform default.
    pub worker_stack_size: Option<usize>,
}

impl Default for BatchOpts {
    fn default() -> Self {
        let limits = PoolLimits::current();
        let max = limits.default_max();
        Self {
            min_pool_size: limits.floor.min(max),
            max_pool_size: max,
            queue_capacity: max * QueueConsts::CAPACITY_PER_WORKER,
            batch_capacity: CollectorSpec::default(),
            tuning_interval_tasks: TuningConsts::INTERVAL_TASKS,
            tuning_window: TuningConsts::WINDOW,
            resize_hysteresis: TuningConsts::HYSTERESIS,
            rate: None,
            graceful_shutdown_timeout: RunConsts::GRACEFUL_SHUTDOWN_TIMEOUT,
            abort_policy: AbortPolicy::default(),
            retry_backoff: RunConsts::RETRY_BACKOFF,
            drain_log_interval: RunConsts::DRAIN_LOG_INTERVAL,
            worker_stack_size: None,
        }
    }
}

impl BatchOpts {
    /// Fixed-size pool of `workers` threads with the default queue sizing.
    pub fn fixed(workers: usize) -> Self {
        Self {
            min_pool_size: workers,
            max_pool_size: workers,
            queue_capacity: workers.max(1) * QueueConsts::CAPACITY_PER_WORKER,
            ..Self::default()
        }
    }

    pub fn with_batch_capacity(mut self, spec: CollectorSpec) -> Self {
        self.batch_capacity = spec;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_pool_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_pool_size = min;
        self.max_pool_size = max;
        self
    }

    pub fn with_rate(mut self, rate: RateOpts) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.abort_policy = policy;
        self
    }

    pub fn with_worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }

    pub fn with_tuning(mut self, interval_tasks: usize, window: usize, hysteresis: usize) -> Self {
        self.tuning_interval_tasks = interval_tasks;
        self.tuning_window = window;
        self.resize_hysteresis = hysteresis;
        self
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.min_pool_size == 0 {
            return Err(BatchError::config("min_pool_size must be at least 1"));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(BatchError::config(format!(
                "min_pool_size ({}) is above max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        if self.queue_capacity == 0 {
            return Err(BatchError::config("queue_capacity must be at least 1"));
        }
        match self.batch_capacity {
            CollectorSpec::Items(0) | CollectorSpec::Weight(0) => {
                return Err(BatchError::config("batch capacity must be positive"));
            }
            _ => {}
        }
        if let Some(rate) = &self.rate {
            rate.validate()?;
        }
        Ok(())
    }
}

/// Processor lifecycle: `Idle → Running → Draining → Done | Aborted`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Running,
    Draining,
    Done,
    Aborted,
}

impl ProcessorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessorState::Done | ProcessorState::Aborted)
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ProcessorState::Idle,
            1 => ProcessorState::Running,
            2 => ProcessorState::Draining,
            3 => ProcessorState::Done,
            _ => ProcessorState::Aborted,
        }
    }
}

/// Point-in-time copy of a [`Tally`](crate::engine::Tally).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TallySnapshot {
    pub items_seen: usize,
    pub items_submitted: usize,
    pub items_completed: usize,
    pub items_failed: usize,
    pub items_cancelled: usize,
    pub batches_submitted: usize,
    pub batches_completed: usize,
    pub batches_failed: usize,
    pub batches_cancelled: usize,
}

impl TallySnapshot {
    /// Batches that reached a final state.
    pub fn batches_finished(&self) -> usize {
        self.batches_completed + self.batches_failed + self.batches_cancelled
    }

    /// Batches submitted but not finished yet.
    pub fn batches_pending(&self) -> usize {
        self.batches_submitted.saturating_sub(self.batches_finished())
    }
}

/// One failed batch, as recorded by the service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureRecord {
    pub seq: u64,
    pub items: usize,
    pub message: String,
}

/// Final statistics of a processor run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub state: ProcessorState,
    pub counts: TallySnapshot,
    pub failures: Vec<FailureRecord>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.state == ProcessorState::Done
            && self.counts.batches_failed == 0
            && self.counts.batches_cancelled == 0
    }
}

/// (De)serialize a `Duration` as integer milliseconds in config files.
mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
