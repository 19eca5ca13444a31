//! The network-call primitive the pool is built on.
//!
//! The pool does not speak any protocol itself. It drives a [`Transport`],
//! which turns requests into callback-style [`Call`]s that can be enqueued,
//! cancelled, and queried for cancellation, much like an `OkHttp` or libcurl
//! multi handle.
//!
//! ## Structure
//!
//! - [`normalize`] - Wraps a transport so every failure is an [`io::Error`].
//! - [`await_call`] - Bridges a callback-style call into a cancellable
//!   future.
//! - `http` - [`reqwest`]-backed transport (feature `http`).
//!
//! [`io::Error`]: std::io::Error
//! [`reqwest`]: https://docs.rs/reqwest

pub mod await_call;
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
#[cfg(feature = "http")]
pub mod http;
pub mod normalize;

use core::time::Duration;

/// A type-erased failure reported by a transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Receives the single outcome of a [`Call`].
///
/// Exactly one of the two methods is invoked, at most once. Implementations
/// may be invoked from any thread, including synchronously from inside
/// [`Call::enqueue`].
pub trait Callback<R>: Send + 'static {
    /// The call produced a response. The callback takes ownership of it.
    fn on_response(self: Box<Self>, response: R);

    /// The call failed, or was cancelled before producing a response.
    fn on_failure(self: Box<Self>, error: BoxError);
}

/// A single in-flight (or not yet started) network call.
pub trait Call: Send + Sync + 'static {
    /// Responses are resources: dropping one releases it.
    type Response: Send + 'static;

    /// Starts the call asynchronously. The outcome is reported to `callback`.
    fn enqueue(&self, callback: Box<dyn Callback<Self::Response>>);

    /// Cancels the call cooperatively. Has no effect once the call completed.
    fn cancel(&self);

    /// Returns `true` once [`cancel`](Call::cancel) has been invoked.
    fn is_cancelled(&self) -> bool;
}

/// Per-call settings applied by the worker that executes a task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Overrides the transport's default timeout for this call only.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Builds options from a millisecond override. Non-positive values mean
    /// "use the transport default".
    pub fn from_timeout_millis(timeout_millis: i64) -> Self {
        Self {
            timeout: timeout_from_millis(timeout_millis),
        }
    }
}

/// Converts a millisecond override into a timeout. Non-positive values yield
/// `None`.
pub fn timeout_from_millis(timeout_millis: i64) -> Option<Duration> {
    u64::try_from(timeout_millis)
        .ok()
        .filter(|&millis| millis > 0)
        .map(Duration::from_millis)
}

/// Creates [`Call`]s from requests.
///
/// A transport is shared read-only by every worker, so `new_call` takes
/// `&self`.
pub trait Transport: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;
    type Call: Call<Response = Self::Response>;

    fn new_call(&self, request: Self::Request, options: &CallOptions) -> Self::Call;
}
