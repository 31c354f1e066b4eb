//! Push-style front end of a processor run.

use super::processor::ActiveRun;
use crate::collector::Collector;
use crate::engine::BatchJob;
use crate::error::BatchError;
use crate::types::TallySnapshot;

/// Handed to the producer closure of [`run_with_emitter`]; items pushed here go through the
/// same collector and submission path as a pulled source.
///
/// [`run_with_emitter`]: super::BatchProcessor::run_with_emitter
pub struct BatchEmitter<'p, C: Collector, J> {
    run: ActiveRun<'p, C, J>,
}

impl<'p, C, J> BatchEmitter<'p, C, J>
where
    C: Collector,
    J: BatchJob<C::Batch> + 'static,
{
    pub(crate) fn new(run: ActiveRun<'p, C, J>) -> Self {
        Self { run }
    }

    pub(crate) fn into_run(self) -> ActiveRun<'p, C, J> {
        self.run
    }

    /// Add one item. Fails with `Cancelled` once the run's cancel handle fired, or with the
    /// submission error when a full batch could not be handed to the service.
    pub fn push(&mut self, item: C::Item) -> Result<(), BatchError> {
        if self.run.is_cancelled() {
            return Err(BatchError::Cancelled);
        }
        self.run.accept(item)
    }

    /// Submit the partial batch now instead of waiting for the collector to fill.
    pub fn flush(&mut self) -> Result<(), BatchError> {
        self.run.submit_current()
    }

    pub fn progress(&self) -> TallySnapshot {
        self.run.progress()
    }
}
