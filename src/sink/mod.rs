//! Sinks that absorb finished batches.

mod sqlite;

pub use sqlite::{SqliteSink, StoredLine};
