//! A transport wrapper that counts live responses.
//!
//! [`GaugedTransport`] hands out [`Gauged`] responses that register with a
//! shared [`LeakGauge`] when created and deregister when dropped. After the
//! pool has terminated, any response still counted as open was leaked.

use crate::telemetry;
use callpool::{BoxError, Call, CallOptions, Callback, Transport};
use core::ops::Deref;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct LeakGauge {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl LeakGauge {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::Acquire)
    }

    /// Responses that were received and have not been dropped yet.
    pub fn open(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }
}

/// A response tracked by a [`LeakGauge`].
#[derive(Debug)]
pub struct Gauged<R> {
    inner: R,
    gauge: Arc<LeakGauge>,
}

impl<R> Gauged<R> {
    fn new(inner: R, gauge: Arc<LeakGauge>) -> Self {
        gauge.opened.fetch_add(1, Ordering::AcqRel);
        telemetry::increment_responses_opened();
        Self { inner, gauge }
    }
}

impl<R> Deref for Gauged<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.inner
    }
}

impl<R> Drop for Gauged<R> {
    fn drop(&mut self) {
        self.gauge.closed.fetch_add(1, Ordering::AcqRel);
        telemetry::increment_responses_closed();
    }
}

pub struct GaugedTransport<T> {
    inner: T,
    gauge: Arc<LeakGauge>,
}

impl<T> GaugedTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            gauge: Arc::default(),
        }
    }

    pub fn gauge(&self) -> Arc<LeakGauge> {
        Arc::clone(&self.gauge)
    }
}

impl<T: Transport> Transport for GaugedTransport<T> {
    type Request = T::Request;
    type Response = Gauged<T::Response>;
    type Call = GaugedCall<T::Call>;

    fn new_call(&self, request: T::Request, options: &CallOptions) -> Self::Call {
        GaugedCall {
            inner: self.inner.new_call(request, options),
            gauge: Arc::clone(&self.gauge),
        }
    }
}

pub struct GaugedCall<C> {
    inner: C,
    gauge: Arc<LeakGauge>,
}

impl<C: Call> Call for GaugedCall<C> {
    type Response = Gauged<C::Response>;

    fn enqueue(&self, callback: Box<dyn Callback<Self::Response>>) {
        self.inner.enqueue(Box::new(GaugedCallback {
            inner: callback,
            gauge: Arc::clone(&self.gauge),
        }));
    }

    fn cancel(&self) {
        self.inner.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

struct GaugedCallback<R> {
    inner: Box<dyn Callback<Gauged<R>>>,
    gauge: Arc<LeakGauge>,
}

impl<R: Send + 'static> Callback<R> for GaugedCallback<R> {
    fn on_response(self: Box<Self>, response: R) {
        self.inner.on_response(Gauged::new(response, self.gauge));
    }

    fn on_failure(self: Box<Self>, error: BoxError) {
        self.inner.on_failure(error);
    }
}
