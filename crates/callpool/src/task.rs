//! Tasks and their single-assignment result slots.
//!
//! A [`Task`] pairs a request with a [`ResultSlot`]. The caller keeps the
//! matching [`ResultHandle`]. The slot is backed by a `oneshot` sender that is
//! *moved* into whichever side completes it (the worker that dequeued the task,
//! or the teardown that drains the queue), and sending consumes it. A second
//! completion is therefore not expressible, and an incomplete slot that is
//! dropped completes itself with [`Error::Cancelled`].
//!
//! Responses are released on every path where nobody will read them:
//!
//! - the slot completes after the handle was dropped;
//! - the handle is dropped after the slot completed;
//! - the wait is cancelled after the slot completed.

use crate::{
    Error, Result, WorkerResult,
    result::release_unclaimed,
    telemetry::{self, Outcome},
};
use core::{
    future::{Future, IntoFuture},
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use pin_project_lite::pin_project;
use portable_atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

type Slot<R> = Result<WorkerResult<R>>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

/// One queued unit of work.
pub(crate) struct Task<Req, R> {
    pub(crate) id: u64,
    pub(crate) request: Req,
    pub(crate) timeout: Option<Duration>,
    pub(crate) slot: ResultSlot<R>,
}

impl<Req, R> Task<Req, R> {
    /// Creates a task and the handle its submitter waits on. The handle
    /// resolves to [`Error::Cancelled`] as soon as `pool_token` is cancelled.
    pub(crate) fn new(
        request: Req,
        timeout: Option<Duration>,
        pool_token: &CancellationToken,
    ) -> (Self, ResultHandle<R>) {
        let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let task = Self {
            id,
            request,
            timeout,
            slot: ResultSlot { tx: Some(tx) },
        };
        let handle = ResultHandle {
            id,
            waiter: Waiter(Some(rx)),
            pool_token: pool_token.clone(),
        };
        (task, handle)
    }
}

/// The write side of a task's result.
pub(crate) struct ResultSlot<R> {
    tx: Option<oneshot::Sender<Slot<R>>>,
}

impl<R> ResultSlot<R> {
    /// Completes the slot. Returns `true` if a waiter received the outcome.
    ///
    /// Only the first call has an effect. If the waiter is gone, a `Success`
    /// response is released here.
    pub(crate) fn complete(&mut self, outcome: Slot<R>) -> bool {
        let Some(tx) = self.tx.take() else {
            return false;
        };

        telemetry::record_outcome(match &outcome {
            Ok(WorkerResult::Success(_)) => Outcome::Success,
            Ok(WorkerResult::Error(_)) => Outcome::Error,
            Err(_) => Outcome::Cancelled,
        });

        match tx.send(outcome) {
            Ok(()) => true,
            Err(outcome) => {
                if let Ok(WorkerResult::Success(response)) = outcome {
                    release_unclaimed(response);
                }
                false
            }
        }
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.tx.is_none()
    }

    /// Returns `true` if nobody is waiting for this slot anymore.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.tx.as_ref().is_none_or(oneshot::Sender::is_closed)
    }

    /// Resolves once the waiter goes away. Never resolves for a completed slot.
    pub(crate) async fn abandoned(&mut self) {
        match self.tx.as_mut() {
            Some(tx) => tx.closed().await,
            None => core::future::pending().await,
        }
    }
}

impl<R> Drop for ResultSlot<R> {
    fn drop(&mut self) {
        if !self.is_completed() {
            self.complete(Err(Error::Cancelled));
        }
    }
}

/// Owns the read side and releases a delivered-but-unread response on drop.
struct Waiter<R>(Option<oneshot::Receiver<Slot<R>>>);

impl<R> Waiter<R> {
    fn release(&mut self) {
        if let Some(mut rx) = self.0.take() {
            rx.close();
            if let Ok(Ok(WorkerResult::Success(response))) = rx.try_recv() {
                release_unclaimed(response);
            }
        }
    }
}

impl<R> Drop for Waiter<R> {
    fn drop(&mut self) {
        self.release();
    }
}

/// The caller's side of a submitted task.
///
/// Await it directly, or use [`wait_with_cancellation`] to tie the wait to a
/// token. Dropping the handle abandons the task: the worker cancels the call
/// if it is in flight, and any response that was already delivered is
/// released.
///
/// [`wait_with_cancellation`]: ResultHandle::wait_with_cancellation
#[must_use = "dropping a `ResultHandle` abandons the task"]
pub struct ResultHandle<R> {
    id: u64,
    waiter: Waiter<R>,
    pool_token: CancellationToken,
}

impl<R> ResultHandle<R> {
    /// Process-unique identifier of the task, as seen in log output.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the task's result. Resolves to [`Error::Cancelled`] if the
    /// pool is closed with `immediately = true` first.
    pub fn wait(self) -> Wait<R> {
        self.wait_inner(None)
    }

    /// Like [`wait`](ResultHandle::wait), but also resolves to
    /// [`Error::Cancelled`] as soon as `token` is cancelled.
    pub fn wait_with_cancellation(self, token: &CancellationToken) -> Wait<R> {
        self.wait_inner(Some(token.clone()))
    }

    fn wait_inner(self, caller_token: Option<CancellationToken>) -> Wait<R> {
        Wait {
            pool_cancelled: self.pool_token.cancelled_owned(),
            caller_cancelled: caller_token.map(CancellationToken::cancelled_owned),
            waiter: self.waiter,
        }
    }
}

impl<R> IntoFuture for ResultHandle<R> {
    type Output = Result<WorkerResult<R>>;
    type IntoFuture = Wait<R>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait()
    }
}

pin_project! {
    /// A future resolving to a task's result, or to [`Error::Cancelled`].
    ///
    /// Cancellation takes precedence: if the wait is cancelled while a result
    /// is already available, the result is discarded (and a `Success` response
    /// released) rather than returned.
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct Wait<R> {
        #[pin]
        pool_cancelled: WaitForCancellationFutureOwned,
        #[pin]
        caller_cancelled: Option<WaitForCancellationFutureOwned>,
        waiter: Waiter<R>,
    }
}

impl<R> Future for Wait<R> {
    type Output = Result<WorkerResult<R>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let cancelled = this.pool_cancelled.poll(cx).is_ready()
            || this
                .caller_cancelled
                .as_pin_mut()
                .is_some_and(|caller| caller.poll(cx).is_ready());
        if cancelled {
            this.waiter.release();
            return Poll::Ready(Err(Error::Cancelled));
        }

        let Some(rx) = this.waiter.0.as_mut() else {
            panic!("`Wait` polled after completion");
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(outcome) => {
                this.waiter.0 = None;
                // A slot that vanished without completing counts as cancelled.
                Poll::Ready(outcome.unwrap_or(Err(Error::Cancelled)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
