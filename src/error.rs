//! Error type shared across partitioning, buffered writes, and work management

use thiserror::Error;

/// Errors produced by this crate.
///
/// Work units report failures through the same type so the work manager can
/// tell an ordinary unit failure apart from an abnormally terminated worker.
#[derive(Debug, Error)]
pub enum WriteError {
    /// A caller-supplied argument was rejected before any work started.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A requested value range has no representable fixed-width integer type.
    #[error("integer cannot be represented by a fixed-width type")]
    IntegerOverflow,

    /// Storage I/O failed underneath a flush.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A work unit returned a failure while executing.
    #[error("work unit failed: {0}")]
    UnitFailed(String),

    /// A work unit was cancelled before it started running.
    #[error("work unit cancelled")]
    Cancelled,

    /// A worker terminated abnormally instead of returning a result.
    #[error("worker thread died: you may have run out of memory")]
    WorkerDied,
}
