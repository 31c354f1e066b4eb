//! Batch containers: what a collector accumulates into.

use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;

/// A batch under construction. `push` reports whether the item was actually stored
/// (sets drop duplicates).
pub trait BatchContainer: Default + Send + 'static {
    type Item;

    fn push(&mut self, item: Self::Item) -> bool;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + 'static> BatchContainer for Vec<T> {
    type Item = T;

    fn push(&mut self, item: T) -> bool {
        Vec::push(self, item);
        true
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

impl<T: Eq + Hash + Send + 'static> BatchContainer for HashSet<T> {
    type Item = T;

    fn push(&mut self, item: T) -> bool {
        self.insert(item)
    }

    fn len(&self) -> usize {
        HashSet::len(self)
    }
}

impl<T: Ord + Send + 'static> BatchContainer for BTreeSet<T> {
    type Item = T;

    fn push(&mut self, item: T) -> bool {
        self.insert(item)
    }

    fn len(&self) -> usize {
        BTreeSet::len(self)
    }
}
