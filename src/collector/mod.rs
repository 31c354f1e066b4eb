//! Batch collectors: accumulate items and decide when a batch is ready.
//!
//! One capability ([`Collector`]) with two policies: [`ItemCountCollector`] and
//! [`WeightCollector`]. [`AnyCollector`] is the closed set the processor builds from a
//! [`CollectorSpec`] when the policy is a configuration choice.
//!
//! A collector belongs to a single producer; it is never shared across threads. Its batch
//! leaves through [`Collector::take`], which also resets the collector for the next cycle.

mod container;
mod itemized;
mod sized;

pub use container::BatchContainer;
pub use itemized::ItemCountCollector;
pub use sized::{Weigher, WeightCollector};

use crate::error::BatchError;
use crate::types::CollectorSpec;

pub trait Collector {
    type Item;
    type Batch: BatchContainer<Item = Self::Item>;

    /// Add one item; returns true when the collector is now full.
    fn accept(&mut self, item: Self::Item) -> bool;

    /// Fullness without mutation.
    fn is_full(&self) -> bool;

    /// Hand out the accumulated batch and start over with an empty one.
    fn take(&mut self) -> Self::Batch;

    /// Items currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Either collector policy, chosen at construction.
pub enum AnyCollector<B: BatchContainer> {
    Items(ItemCountCollector<B>),
    Weight(WeightCollector<B>),
}

impl<B: BatchContainer> AnyCollector<B> {
    /// Build from a spec. `Weight` needs a weigher; without one each item weighs 1.
    pub fn from_spec(
        spec: CollectorSpec,
        weigher: Option<Weigher<B::Item>>,
    ) -> Result<Self, BatchError> {
        match spec {
            CollectorSpec::Items(n) => Ok(AnyCollector::Items(ItemCountCollector::new(n)?)),
            CollectorSpec::Weight(max) => {
                let weigher = match weigher {
                    Some(w) => w,
                    None => {
                        let unit: Weigher<B::Item> = std::sync::Arc::new(|_: &B::Item| 1u64);
                        unit
                    }
                };
                Ok(AnyCollector::Weight(WeightCollector::new(max, weigher)?))
            }
        }
    }
}

impl<B: BatchContainer> Collector for AnyCollector<B> {
    type Item = B::Item;
    type Batch = B;

    fn accept(&mut self, item: B::Item) -> bool {
        match self {
            AnyCollector::Items(c) => c.accept(item),
            AnyCollector::Weight(c) => c.accept(item),
        }
    }

    fn is_full(&self) -> bool {
        match self {
            AnyCollector::Items(c) => c.is_full(),
            AnyCollector::Weight(c) => c.is_full(),
        }
    }

    fn take(&mut self) -> B {
        match self {
            AnyCollector::Items(c) => c.take(),
            AnyCollector::Weight(c) => c.take(),
        }
    }

    fn len(&self) -> usize {
        match self {
            AnyCollector::Items(c) => c.len(),
            AnyCollector::Weight(c) => c.len(),
        }
    }
}
