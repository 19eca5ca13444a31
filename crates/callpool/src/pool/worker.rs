use super::PoolTask;
use crate::{
    Error, NormalizingTransport, TaskQueue, WorkerResult,
    result::release_unclaimed,
    task::Task,
    telemetry,
    transport::{Call, CallOptions, Transport, await_call::await_call},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Worker task that executes queued tasks one at a time.
///
/// The worker dequeues in FIFO order until the queue is closed and empty, or
/// until `shutdown_token` is cancelled. In the latter case it stops the task
/// it is running, then completes every task still queued with
/// [`Error::Cancelled`] so no waiter is left hanging.
///
/// # Arguments
///
/// - `worker_id`: Numeric identifier for this worker (used for logs).
/// - `transport`: The shared, normalizing transport.
/// - `queue`: The pool's intake queue.
/// - `shutdown_token`: Cancelled when the pool is closed abruptly.
pub(crate) async fn worker_loop<T: Transport>(
    worker_id: usize,
    transport: Arc<NormalizingTransport<T>>,
    queue: Arc<TaskQueue<PoolTask<T>>>,
    shutdown_token: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    loop {
        let task = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            task = queue.dequeue() => task,
        };
        let Some(task) = task else {
            break;
        };
        execute_task(worker_id, &transport, task, &shutdown_token).await;
    }

    if shutdown_token.is_cancelled() {
        let drained = queue.drain().await;
        #[cfg(feature = "tracing")]
        {
            if !drained.is_empty() {
                tracing::debug!(
                    "Worker {worker_id} cancelling {} queued tasks",
                    drained.len()
                );
            }
        }
        for mut task in drained {
            task.slot.complete(Err(Error::Cancelled));
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}

/// Runs one task to completion and routes its outcome into the result slot.
///
/// A waiter leaving mid-call cancels the call, but the worker still waits for
/// the call's outcome and releases a late response itself. Only an abrupt
/// pool close stops waiting early.
async fn execute_task<T: Transport>(
    _worker_id: usize,
    transport: &NormalizingTransport<T>,
    task: PoolTask<T>,
    shutdown_token: &CancellationToken,
) {
    let Task {
        id: _id,
        request,
        timeout,
        mut slot,
    } = task;

    if slot.is_abandoned() {
        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {_worker_id} skipping task {_id}: waiter is gone");
        return;
    }

    let call = transport.new_call(request, &CallOptions { timeout });
    let pending = await_call(&call, shutdown_token);
    tokio::pin!(pending);

    telemetry::increment_calls_inflight();
    let outcome = tokio::select! {
        outcome = &mut pending => outcome,
        () = slot.abandoned() => {
            #[cfg(feature = "tracing")]
            tracing::trace!("Worker {_worker_id} cancelling task {_id}: waiter went away");
            call.cancel();
            // Cancellation is cooperative. Stay on the call until it reports.
            if let Ok(WorkerResult::Success(response)) = pending.await {
                release_unclaimed(response);
            }
            Err(Error::Cancelled)
        }
    };
    telemetry::decrement_calls_inflight();

    slot.complete(outcome);
}
