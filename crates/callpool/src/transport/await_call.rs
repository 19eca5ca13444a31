//! Bridges callback-style [`Call`]s into cancellable futures.

use super::{BoxError, Call, Callback, normalize::into_io_error};
use crate::{Error, Result, WorkerResult, result::release_unclaimed};
use std::io;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

type Delivery<R> = core::result::Result<R, BoxError>;

/// Forwards the call's outcome into a oneshot channel.
///
/// If the awaiting side is already gone when a response arrives, the response
/// is released here instead of being left for nobody.
struct OneshotCallback<R> {
    tx: oneshot::Sender<Delivery<R>>,
}

impl<R: Send + 'static> Callback<R> for OneshotCallback<R> {
    fn on_response(self: Box<Self>, response: R) {
        if let Err(Ok(response)) = self.tx.send(Ok(response)) {
            release_unclaimed(response);
        }
    }

    fn on_failure(self: Box<Self>, error: BoxError) {
        let _ = self.tx.send(Err(error));
    }
}

/// Cancels the call unless disarmed. Covers the awaiting future being dropped
/// mid-flight.
struct CancelOnDrop<'a, C: Call> {
    call: &'a C,
    armed: bool,
}

impl<C: Call> Drop for CancelOnDrop<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.call.cancel();
        }
    }
}

/// Enqueues `call` and waits for its outcome.
///
/// - A response resolves to [`WorkerResult::Success`].
/// - A failure resolves to [`WorkerResult::Error`], unless the call reports
///   itself cancelled or `token` was cancelled, in which case the failure is
///   treated as a side effect of cancelling and [`Error::Cancelled`] is
///   returned instead.
/// - If `token` is cancelled first, the call is cancelled and
///   [`Error::Cancelled`] is returned. A response that still arrives later is
///   released by the callback.
/// - If the returned future is dropped before completion, the call is
///   cancelled.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] as described above.
pub async fn await_call<C: Call>(
    call: &C,
    token: &CancellationToken,
) -> Result<WorkerResult<C::Response>> {
    if token.is_cancelled() {
        call.cancel();
        return Err(Error::Cancelled);
    }

    let (tx, mut rx) = oneshot::channel();
    let mut guard = CancelOnDrop { call, armed: true };
    call.enqueue(Box::new(OneshotCallback { tx }));

    let delivery = tokio::select! {
        biased;
        () = token.cancelled() => {
            if let Ok(Ok(response)) = rx.try_recv() {
                release_unclaimed(response);
            }
            return Err(Error::Cancelled);
        }
        delivery = &mut rx => delivery,
    };
    guard.armed = false;

    let cancelled = || call.is_cancelled() || token.is_cancelled();
    match delivery {
        Ok(Ok(response)) => Ok(WorkerResult::Success(response)),
        Ok(Err(_)) | Err(_) if cancelled() => Err(Error::Cancelled),
        Ok(Err(error)) => Ok(WorkerResult::Error(into_io_error(error))),
        Err(_) => Ok(WorkerResult::Error(io::Error::other(
            "call dropped its callback without reporting an outcome",
        ))),
    }
}
