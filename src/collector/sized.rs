use std::sync::Arc;

use super::{BatchContainer, Collector};
use crate::error::BatchError;

/// Weight of one item, e.g. its byte length.
pub type Weigher<T> = Arc<dyn Fn(&T) -> u64 + Send + Sync>;

/// Full when the summed weight of accepted items reaches `max_weight`.
///
/// An item heavier than `max_weight` on its own is still accepted; the collector is full
/// right after it.
pub struct WeightCollector<B: BatchContainer> {
    batch: B,
    weight: u64,
    max_weight: u64,
    weigher: Weigher<B::Item>,
}

impl<B: BatchContainer> WeightCollector<B> {
    pub fn new(max_weight: u64, weigher: Weigher<B::Item>) -> Result<Self, BatchError> {
        if max_weight == 0 {
            return Err(BatchError::config("weight capacity must be at least 1"));
        }
        Ok(Self {
            batch: B::default(),
            weight: 0,
            max_weight,
            weigher,
        })
    }

    /// Weight accumulated since the last `take`.
    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn max_weight(&self) -> u64 {
        self.max_weight
    }
}

impl<B: BatchContainer> Collector for WeightCollector<B> {
    type Item = B::Item;
    type Batch = B;

    fn accept(&mut self, item: B::Item) -> bool {
        let w = (self.weigher)(&item);
        if self.batch.push(item) {
            self.weight = self.weight.saturating_add(w);
        }
        self.is_full()
    }

    fn is_full(&self) -> bool {
        self.weight >= self.max_weight
    }

    fn take(&mut self) -> B {
        self.weight = 0;
        std::mem::take(&mut self.batch)
    }

    fn len(&self) -> usize {
        self.batch.len()
    }
}
