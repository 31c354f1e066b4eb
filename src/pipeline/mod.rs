//! Pipeline: item sources, the batch processor, and its push-style emitter.

pub mod emitter;
pub mod processor;
pub mod source;

pub use emitter::BatchEmitter;
pub use processor::{
    BatchProcessor, CancelHandle, ListBatchProcessor, OrderedSetBatchProcessor, SetBatchProcessor,
    WeightedBatchProcessor,
};
pub use source::{ChannelSource, ItemSource, IterSource, Line, LineSource, Pull, TryIterSource};
