//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package names (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackageNames {
    pkg_name: &'static str,
    config_filename: String,
    default_db_filename: String,
    worker_thread_prefix: String,
}

static PACKAGE_NAMES: OnceLock<PackageNames> = OnceLock::new();

impl PackageNames {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackageNames {
        PACKAGE_NAMES.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackageNames {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
                default_db_filename: format!("{pkg}.db"),
                worker_thread_prefix: format!("{pkg}-worker"),
            }
        })
    }

    pub fn pkg_name(&self) -> &'static str {
        self.pkg_name
    }

    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    pub fn default_db_filename(&self) -> &str {
        &self.default_db_filename
    }

    /// Name given to worker thread `n` (shows up in panics and debuggers).
    pub fn worker_thread_name(&self, n: usize) -> String {
        format!("{}-{n}", self.worker_thread_prefix)
    }
}

// ---- Worker pool ----

/// Pool size limits used when the caller does not pick them.
/// Use [`PoolLimits::current()`] to fill `all_threads` from rayon; the rest are const.
#[derive(Clone, Copy, Debug)]
pub struct PoolLimits {
    /// Available threads (from rayon); set by [`PoolLimits::current()`].
    pub all_threads: usize,
    /// Floor / minimum pool size.
    pub floor: usize,
    /// Hard ceiling regardless of core count.
    pub ceiling: usize,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            all_threads: 0, // use current() to set from rayon
            floor: Self::FLOOR_THREADS,
            ceiling: Self::CEILING_THREADS,
        }
    }
}

impl PoolLimits {
    pub const FLOOR_THREADS: usize = 1;
    pub const CEILING_THREADS: usize = 64;

    /// Build limits with `all_threads` set from `rayon::current_num_threads()`.
    pub fn current() -> Self {
        Self {
            all_threads: rayon::current_num_threads(),
            ..Self::default()
        }
    }

    /// Default max pool size: every available core, capped by the ceiling.
    pub fn default_max(&self) -> usize {
        self.all_threads.clamp(self.floor, self.ceiling)
    }
}

// ---- Queue ----

pub struct QueueConsts;

impl QueueConsts {
    /// Queue slots per max worker.
    pub const CAPACITY_PER_WORKER: usize = 2;
    /// How long a blocked `submit` sleeps on the queue before re-checking for shutdown.
    pub const SUBMIT_POLL: Duration = Duration::from_millis(50);
    /// How long an idle worker waits for a task before checking whether it should retire.
    pub const WORKER_IDLE_POLL: Duration = Duration::from_millis(25);
}

// ---- Pool tuning ----

pub struct TuningConsts;

impl TuningConsts {
    /// Completions between two tuning passes.
    pub const INTERVAL_TASKS: usize = 16;
    /// Completion-time samples kept for the tuner.
    pub const WINDOW: usize = 32;
    /// Minimum |recommended - current| before the pool is actually resized.
    pub const HYSTERESIS: usize = 1;
    /// Below this many samples the tuner keeps the current size.
    pub const MIN_SAMPLES: usize = 4;
    /// Relative change of mean completion time that counts as a trend (5%).
    pub const TREND_TOLERANCE: f64 = 0.05;
    /// Busy fraction below which workers are considered mostly idle.
    pub const LOW_UTILISATION: f64 = 0.5;
}

// ---- Rate control ----

pub struct RateConsts;

impl RateConsts {
    pub const MIN_DELAY: Duration = Duration::ZERO;
    pub const MAX_DELAY: Duration = Duration::from_secs(5);
    /// Multiplier applied to the delay after a success (< 1).
    pub const DECAY_FACTOR: f64 = 0.9;
    /// Multiplier applied to the delay after an overload failure (> 1).
    pub const GROWTH_FACTOR: f64 = 2.0;
    /// Delay a dynamic executor starts from when its minimum is zero.
    pub const SEED_DELAY: Duration = Duration::from_millis(10);
}

// ---- Run control ----

pub struct RunConsts;

impl RunConsts {
    pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(300);
    /// Pause before pulling again when the source reports a transient empty condition.
    pub const RETRY_BACKOFF: Duration = Duration::from_millis(20);
    /// How often draining logs a "please wait" line.
    pub const DRAIN_LOG_INTERVAL: Duration = Duration::from_secs(60);
}

// ---- Batches ----

/// Default item-count capacity.
pub const DEFAULT_BATCH_ITEMS: usize = 1000;

/// Items per CLI progress-bar refresh (reduce lock contention on the bar).
pub const PROGRESS_UPDATE_BATCH_SIZE: usize = 100;
