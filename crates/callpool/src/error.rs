//! Error types for the worker pool.
//!
//! This module defines the central `Error` enum, which captures every outcome
//! of a pool operation that is *not* a task result. Network failures are never
//! reported here: they are data, delivered as
//! [`WorkerResult::Error`](crate::WorkerResult::Error) to the task's waiter.
//!
//! ## Error Cases
//! - `PoolClosed`: A task was submitted after the pool stopped accepting work.
//! - `QueueFull`: A bounded queue is at capacity.
//! - `Cancelled`: The waiter's interest was withdrawn, either by the caller or
//!   by an abrupt pool shutdown.
//! - `AlreadyStarted`: Workers were started twice on the same pool.
//! - `InvalidConfig`: The pool configuration was rejected.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for pool operations.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The task queue is closed and no longer accepts tasks.
    #[error("Worker pool is closed")]
    PoolClosed,

    /// The bounded task queue has no free slot.
    #[error("Task queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The wait for a task result was cancelled.
    ///
    /// This is a signal, not a task outcome: it is raised when the caller
    /// cancels its wait or when the pool is closed with `immediately = true`.
    #[error("Task cancelled")]
    Cancelled,

    /// [`WorkerPool::start_workers`](crate::WorkerPool::start_workers) was
    /// called more than once.
    #[error("Workers have already been started")]
    AlreadyStarted,

    /// The pool configuration was rejected.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Returns `true` for the cancellation-class signal.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
