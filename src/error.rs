//! Error taxonomy for the batch core.

use thiserror::Error;

use crate::types::RunReport;

/// Errors raised by the collector, service, processor and rate executor.
///
/// `Processing` and `Cancelled` are captured at the task boundary and only ever show up in
/// task outcomes and reports; `Source` aborts a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("source error: {0}")]
    Source(String),

    #[error("batch {seq} failed: {message}")]
    Processing { seq: u64, message: String },

    #[error("submission rejected: service is shutting down")]
    Rejected,

    #[error("pool resize failed: {0}")]
    Resize(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("downstream overloaded: {0}")]
    Overloaded(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BatchError {
    pub fn config(msg: impl Into<String>) -> Self {
        BatchError::Config(msg.into())
    }

    pub fn overloaded(msg: impl Into<String>) -> Self {
        BatchError::Overloaded(msg.into())
    }

    /// True when this error (or an `anyhow` chain carrying it) asks the rate executor to back off.
    pub fn is_overload(&self) -> bool {
        matches!(self, BatchError::Overloaded(_))
    }

    /// Look for a `BatchError` anywhere in an `anyhow` chain.
    pub fn find_in(err: &anyhow::Error) -> Option<&BatchError> {
        err.chain().find_map(|e| e.downcast_ref::<BatchError>())
    }
}

/// Returned by an aborted processor run: the cause plus everything counted up to that point.
#[derive(Debug, Error)]
#[error("run aborted: {cause}")]
pub struct RunError {
    pub cause: BatchError,
    pub report: RunReport,
}
