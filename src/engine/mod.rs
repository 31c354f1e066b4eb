//! Engine: tasks, the worker pool service, pool tuning, and submission pacing.

mod pool;
pub mod rate;
pub mod retry;
pub mod service;
pub mod tally;
pub mod task;
pub mod tuner;

pub use rate::{DynamicRateExecutor, RateLimitedExecutor, RateSnapshot};
pub use retry::AttemptsExecutor;
pub use service::{BatchService, CompletionCounts, ServiceSnapshot};
pub use tally::{Ledger, Tally};
pub use task::{BatchJob, TaskContext, TaskHandle, TaskObserver, TaskOutcome, TaskReport};
pub use tuner::{Trend, TuningInput, recommend};
