//! The worker pool.
//!
//! [`WorkerPool`] owns a shared [`TaskQueue`] and `N` worker tasks that pull
//! from it. Each worker runs one transport call at a time, so at most `N` calls
//! are ever in flight. Shutdown is coordinated through a shared
//! [`CancellationToken`] and a [`TaskTracker`] over the workers.

use super::{PoolConfig, PoolState, PoolTask, worker::worker_loop};
use crate::{
    Error, NormalizingTransport, Result, ResultHandle, TaskQueue, WorkerResult,
    task::Task,
    telemetry,
    transport::{Transport, timeout_from_millis},
};
use core::time::Duration;
use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// A bounded pool of workers executing network calls through a [`Transport`].
///
/// The transport is always wrapped in a [`NormalizingTransport`], so task
/// failures reach callers as [`std::io::Error`]s and never as panics.
///
/// Dropping the pool closes it gracefully: workers that were started finish
/// the queue and exit on their own.
pub struct WorkerPool<T: Transport> {
    transport: Arc<NormalizingTransport<T>>,
    config: PoolConfig,
    queue: Arc<TaskQueue<PoolTask<T>>>,
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl<T: Transport> WorkerPool<T> {
    /// Creates a pool that runs at most `max_concurrent_tasks` calls at once
    /// over an unbounded queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_concurrent_tasks` is zero.
    pub fn new(transport: T, max_concurrent_tasks: usize) -> Result<Self> {
        Self::with_config(transport, PoolConfig::new(max_concurrent_tasks))
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not
    /// [validate](PoolConfig::validate).
    pub fn with_config(transport: T, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let queue = match config.queue_capacity {
            Some(capacity) => TaskQueue::bounded(capacity)?,
            None => TaskQueue::unbounded(),
        };
        Ok(Self {
            transport: Arc::new(NormalizingTransport::new(transport)),
            config,
            queue: Arc::new(queue),
            shutdown_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Spawns the workers on the current Tokio runtime.
    ///
    /// Tasks submitted before this call wait in the queue.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolClosed`] if the pool was already closed.
    /// - [`Error::AlreadyStarted`] if workers were started before.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start_workers(&self) -> Result<()> {
        if self.queue.is_closed() {
            return Err(Error::PoolClosed);
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyStarted);
        }

        for worker_id in 0..self.config.max_concurrent_tasks {
            self.tracker.spawn(worker_loop(
                worker_id,
                Arc::clone(&self.transport),
                Arc::clone(&self.queue),
                self.shutdown_token.clone(),
            ));
        }
        self.tracker.close();

        #[cfg(feature = "tracing")]
        tracing::debug!("Started {} workers", self.config.max_concurrent_tasks);
        Ok(())
    }

    /// Enqueues a task and returns the handle its result is delivered to.
    ///
    /// A positive `timeout_millis` overrides the transport's default timeout
    /// for this call only; zero or negative keeps the default.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolClosed`] if the pool no longer accepts tasks.
    /// - [`Error::QueueFull`] if the queue is bounded and at capacity.
    pub fn submit(
        &self,
        request: T::Request,
        timeout_millis: i64,
    ) -> Result<ResultHandle<T::Response>> {
        let (task, handle) = Task::new(
            request,
            timeout_from_millis(timeout_millis),
            &self.shutdown_token,
        );
        match self.queue.enqueue(task) {
            Ok(()) => {
                telemetry::increment_tasks_submitted();
                Ok(handle)
            }
            Err(e) => {
                telemetry::increment_tasks_rejected();
                Err(e)
            }
        }
    }

    /// Submits `request` with the transport's default timeout and waits for
    /// its result.
    ///
    /// Dropping the returned future abandons the task: an in-flight call is
    /// cancelled and a response that already arrived is released.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolClosed`] or [`Error::QueueFull`] if the task is rejected.
    /// - [`Error::Cancelled`] if the pool is closed with `immediately = true`
    ///   before the result is delivered.
    pub async fn execute(&self, request: T::Request) -> Result<WorkerResult<T::Response>> {
        self.execute_with_timeout(request, -1).await
    }

    /// Like [`execute`](WorkerPool::execute) with a per-task timeout override.
    ///
    /// # Errors
    ///
    /// See [`execute`](WorkerPool::execute).
    pub async fn execute_with_timeout(
        &self,
        request: T::Request,
        timeout_millis: i64,
    ) -> Result<WorkerResult<T::Response>> {
        self.submit(request, timeout_millis)?.await
    }

    /// Like [`execute_with_timeout`](WorkerPool::execute_with_timeout), but
    /// also gives up with [`Error::Cancelled`] once `token` is cancelled.
    ///
    /// # Errors
    ///
    /// See [`execute`](WorkerPool::execute).
    pub async fn execute_with_cancellation(
        &self,
        request: T::Request,
        timeout_millis: i64,
        token: &CancellationToken,
    ) -> Result<WorkerResult<T::Response>> {
        self.submit(request, timeout_millis)?
            .wait_with_cancellation(token)
            .await
    }

    /// Stops accepting tasks. Never waits.
    ///
    /// - `immediately = false`: queued tasks still run and deliver results.
    /// - `immediately = true`: in-flight calls are cancelled, queued tasks are
    ///   discarded, and every waiter resolves to [`Error::Cancelled`].
    ///
    /// Calling it again is harmless, and a graceful close can be escalated by
    /// a later abrupt one.
    pub fn close(&self, immediately: bool) {
        if self.queue.close() {
            #[cfg(feature = "tracing")]
            tracing::info!(
                "Worker pool closed to new tasks ({} queued)",
                self.queue.len()
            );
        }
        self.tracker.close();

        if immediately && !self.shutdown_token.is_cancelled() {
            #[cfg(feature = "tracing")]
            tracing::info!("Cancelling in-flight and queued tasks");
            self.shutdown_token.cancel();
        }
    }

    /// Closes gracefully, then cancels whatever is still running after
    /// `grace`. Resolves once every worker has exited.
    pub async fn shutdown(&self, grace: Duration) {
        self.close(false);

        if tokio::time::timeout(grace, self.terminated()).await.is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Graceful drain timed out after {grace:?} ({} tasks still queued)",
                self.queue.len()
            );
            self.close(true);
            self.terminated().await;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool shutdown complete");
    }

    /// Resolves once the pool is closed and every worker has exited.
    pub async fn terminated(&self) {
        self.tracker.wait().await;
    }

    pub fn state(&self) -> PoolState {
        if !self.queue.is_closed() {
            PoolState::Open
        } else if self.tracker.is_empty() {
            PoolState::Closed
        } else {
            PoolState::Closing
        }
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The transport shared by every worker.
    pub fn transport(&self) -> &T {
        self.transport.inner()
    }
}

impl<T: Transport> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.close(false);
    }
}
