use super::{BatchContainer, Collector};
use crate::error::BatchError;

/// Full when the batch holds `max_items` items.
pub struct ItemCountCollector<B: BatchContainer> {
    batch: B,
    max_items: usize,
}

impl<B: BatchContainer> ItemCountCollector<B> {
    pub fn new(max_items: usize) -> Result<Self, BatchError> {
        if max_items == 0 {
            return Err(BatchError::config("item-count capacity must be at least 1"));
        }
        Ok(Self {
            batch: B::default(),
            max_items,
        })
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }
}

impl<B: BatchContainer> Collector for ItemCountCollector<B> {
    type Item = B::Item;
    type Batch = B;

    fn accept(&mut self, item: B::Item) -> bool {
        self.batch.push(item);
        self.is_full()
    }

    fn is_full(&self) -> bool {
        self.batch.len() >= self.max_items
    }

    fn take(&mut self) -> B {
        std::mem::take(&mut self.batch)
    }

    fn len(&self) -> usize {
        self.batch.len()
    }
}
