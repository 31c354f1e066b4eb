//! Batchwerk: adaptive batch processing on a self-tuning worker pool.
//!
//! Items pulled from a source are accumulated by a [`Collector`](collector::Collector) until it
//! reports full; each full batch becomes a task on a [`BatchService`], whose bounded queue
//! applies back-pressure and whose pool is resized from recent completion timing. An optional
//! [`DynamicRateExecutor`] spaces submissions and backs off when jobs report overload.
//!
//! ```ignore
//! let service = Arc::new(BatchService::new(BatchOpts::fixed(4))?);
//! let processor = BatchProcessor::list(Arc::clone(&service), 100, |batch: Vec<u64>, _: &TaskContext| {
//!     store(&batch)
//! })?;
//! let report = processor.run(IterSource::new(0..10_000))?;
//! service.shutdown(true);
//! ```

pub mod cli;
pub mod collector;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use engine::{
    AttemptsExecutor, BatchJob, BatchService, CompletionCounts, DynamicRateExecutor,
    RateLimitedExecutor, TaskContext, TaskHandle, TaskObserver, TaskOutcome,
};
pub use error::{BatchError, RunError};
pub use pipeline::{BatchEmitter, BatchProcessor, CancelHandle, ItemSource, IterSource, Pull};

/// Result alias used by the public batchwerk API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;
