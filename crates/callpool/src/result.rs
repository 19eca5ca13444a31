use std::io;

/// The outcome of a single task.
///
/// A `Success` owns a response resource. Whoever ends up holding it is
/// responsible for it, and it is released when dropped. The pool drops (and
/// therefore releases) any response whose waiter has gone away.
///
/// Failures of any kind are normalized to [`io::Error`] before they reach this
/// type; see [`NormalizingTransport`](crate::NormalizingTransport).
#[derive(Debug)]
#[must_use = "a `Success` holds a response that should be consumed"]
pub enum WorkerResult<R> {
    /// The transport delivered a response.
    Success(R),
    /// The transport call failed.
    Error(io::Error),
}

impl<R> WorkerResult<R> {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns a reference to the response, if any.
    pub const fn response(&self) -> Option<&R> {
        match self {
            Self::Success(response) => Some(response),
            Self::Error(_) => None,
        }
    }

    /// Returns a reference to the failure, if any.
    pub const fn error(&self) -> Option<&io::Error> {
        match self {
            Self::Success(_) => None,
            Self::Error(e) => Some(e),
        }
    }

    /// Converts into an [`io::Result`], handing ownership of the response to
    /// the caller.
    pub fn into_io_result(self) -> io::Result<R> {
        match self {
            Self::Success(response) => Ok(response),
            Self::Error(e) => Err(e),
        }
    }

    /// Maps the response, leaving failures untouched.
    pub fn map<U, F>(self, f: F) -> WorkerResult<U>
    where
        F: FnOnce(R) -> U,
    {
        match self {
            Self::Success(response) => WorkerResult::Success(f(response)),
            Self::Error(e) => WorkerResult::Error(e),
        }
    }
}

/// Drops a response nobody is waiting for.
///
/// Every place the pool discards an unclaimed response goes through here so
/// the release is logged and counted.
pub(crate) fn release_unclaimed<R>(response: R) {
    #[cfg(feature = "tracing")]
    tracing::debug!("Closing unclaimed response");
    drop(response);
    crate::telemetry::increment_responses_released();
}

impl<R> From<io::Result<R>> for WorkerResult<R> {
    fn from(value: io::Result<R>) -> Self {
        match value {
            Ok(response) => Self::Success(response),
            Err(e) => Self::Error(e),
        }
    }
}
