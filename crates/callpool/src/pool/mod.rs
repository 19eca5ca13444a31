//! # Worker pool
//!
//! - [`WorkerPool`] - Accepts tasks, runs at most `N` at once, and delivers
//!   each result to the task's [`ResultHandle`](crate::ResultHandle).
//! - [`PoolConfig`] - Worker count and optional queue bound.
//! - [`PoolState`] - Lifecycle as observed from outside.

mod config;
mod manager;
mod worker;

pub use config::PoolConfig;
pub use manager::WorkerPool;

use crate::{task::Task, transport::Transport};

pub(crate) type PoolTask<T> = Task<<T as Transport>::Request, <T as Transport>::Response>;

/// Lifecycle of a [`WorkerPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting tasks.
    Open,
    /// No longer accepting tasks; workers are still running.
    Closing,
    /// No longer accepting tasks, and no worker is running.
    Closed,
}

#[cfg(test)]
mod tests;
