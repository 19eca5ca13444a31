//! Failure normalization.
//!
//! Callers of the pool see one error category for "the call failed":
//! [`io::Error`]. [`NormalizingTransport`] guarantees this for any wrapped
//! transport by re-wrapping every non-`io::Error` failure, and by converting
//! panics that escape the transport's own machinery into failures delivered to
//! the same callback.

use super::{BoxError, Call, CallOptions, Callback, Transport};
use crate::result::release_unclaimed;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

/// Converts any transport failure into an [`io::Error`].
///
/// Failures that already are `io::Error`s are returned as-is, preserving their
/// [`io::ErrorKind`]. Anything else becomes [`io::ErrorKind::Other`] with the
/// original error as its source.
pub fn into_io_error(error: BoxError) -> io::Error {
    match error.downcast::<io::Error>() {
        Ok(e) => *e,
        Err(other) => io::Error::other(other),
    }
}

fn panic_to_io_error(payload: Box<dyn Any + Send>) -> io::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string panic payload"));
    io::Error::other(format!("transport panicked: {message}"))
}

/// A [`Transport`] whose calls only ever fail with [`io::Error`]s.
#[derive(Clone, Debug, Default)]
pub struct NormalizingTransport<T> {
    inner: T,
}

impl<T> NormalizingTransport<T> {
    pub const fn new(inner: T) -> Self {
        Self { inner }
    }

    pub const fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Transport> Transport for NormalizingTransport<T> {
    type Request = T::Request;
    type Response = T::Response;
    type Call = NormalizingCall<T::Call>;

    fn new_call(&self, request: Self::Request, options: &CallOptions) -> Self::Call {
        match panic::catch_unwind(AssertUnwindSafe(|| self.inner.new_call(request, options))) {
            Ok(call) => NormalizingCall::ready(call),
            Err(payload) => NormalizingCall::failed(panic_to_io_error(payload)),
        }
    }
}

/// A call produced by [`NormalizingTransport`].
///
/// If the wrapped transport panicked while creating the call, this holds the
/// resulting failure and reports it on [`enqueue`](Call::enqueue).
pub struct NormalizingCall<C> {
    inner: Option<C>,
    setup_error: Mutex<Option<io::Error>>,
    cancelled: AtomicBool,
}

impl<C> NormalizingCall<C> {
    const fn ready(inner: C) -> Self {
        Self {
            inner: Some(inner),
            setup_error: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    const fn failed(error: io::Error) -> Self {
        Self {
            inner: None,
            setup_error: Mutex::new(Some(error)),
            cancelled: AtomicBool::new(false),
        }
    }

    pub const fn inner(&self) -> Option<&C> {
        self.inner.as_ref()
    }
}

impl<C: Call> Call for NormalizingCall<C> {
    type Response = C::Response;

    fn enqueue(&self, callback: Box<dyn Callback<Self::Response>>) {
        let Some(inner) = &self.inner else {
            let error = self
                .setup_error
                .lock()
                .take()
                .unwrap_or_else(|| io::Error::other("call was already enqueued"));
            callback.on_failure(Box::new(error));
            return;
        };

        // The callback is shared with the forwarder so it can still be failed
        // if the inner transport panics after taking ownership of it.
        let slot = Arc::new(Mutex::new(Some(callback)));
        let forward = Box::new(NormalizingCallback {
            slot: Arc::clone(&slot),
        });

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| inner.enqueue(forward))) {
            let error = panic_to_io_error(payload);
            #[cfg(feature = "tracing")]
            tracing::warn!("Transport panicked during enqueue: {error}");
            let callback = slot.lock().take();
            if let Some(callback) = callback {
                callback.on_failure(Box::new(error));
            }
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(inner) = &self.inner {
            inner.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.inner.as_ref().is_some_and(C::is_cancelled)
    }
}

struct NormalizingCallback<R> {
    slot: Arc<Mutex<Option<Box<dyn Callback<R>>>>>,
}

impl<R: Send + 'static> Callback<R> for NormalizingCallback<R> {
    fn on_response(self: Box<Self>, response: R) {
        let callback = self.slot.lock().take();
        match callback {
            Some(callback) => callback.on_response(response),
            None => release_unclaimed(response),
        }
    }

    fn on_failure(self: Box<Self>, error: BoxError) {
        let callback = self.slot.lock().take();
        if let Some(callback) = callback {
            callback.on_failure(Box::new(into_io_error(error)));
        }
    }
}
