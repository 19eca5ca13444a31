//! A [`Transport`] backed by [`reqwest`].
//!
//! Each call runs on its own Tokio task and races the request against the
//! call's [`CancellationToken`]. Dropping a [`reqwest::Response`] returns its
//! connection to the client's pool, so the pool's release-on-drop handling
//! applies unchanged.

use super::{BoxError, Call, CallOptions, Callback, Transport};
use core::time::Duration;
use parking_lot::Mutex;
use std::io;
use tokio_util::sync::CancellationToken;

/// Issues [`reqwest::Request`]s through a shared [`reqwest::Client`].
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    default_timeout: Option<Duration>,
}

impl HttpTransport {
    pub const fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            default_timeout: None,
        }
    }

    /// Applies `timeout` to every call that has no override of its own.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl Transport for HttpTransport {
    type Request = reqwest::Request;
    type Response = reqwest::Response;
    type Call = HttpCall;

    fn new_call(&self, mut request: reqwest::Request, options: &CallOptions) -> HttpCall {
        if let Some(timeout) = options.timeout.or(self.default_timeout) {
            *request.timeout_mut() = Some(timeout);
        }
        HttpCall {
            client: self.client.clone(),
            request: Mutex::new(Some(request)),
            token: CancellationToken::new(),
        }
    }
}

/// A single HTTP exchange. Can be enqueued once.
pub struct HttpCall {
    client: reqwest::Client,
    request: Mutex<Option<reqwest::Request>>,
    token: CancellationToken,
}

impl Call for HttpCall {
    type Response = reqwest::Response;

    fn enqueue(&self, callback: Box<dyn Callback<reqwest::Response>>) {
        let Some(request) = self.request.lock().take() else {
            callback.on_failure(Box::new(io::Error::other("call was already enqueued")));
            return;
        };

        let client = self.client.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    callback.on_failure(Box::new(io::Error::other("Canceled")));
                }
                result = client.execute(request) => match result {
                    Ok(response) => callback.on_response(response),
                    Err(e) => callback.on_failure(to_io_error(e)),
                },
            }
        });
    }

    fn cancel(&self) {
        self.token.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Keeps the [`reqwest::Error`] as the source and maps the failure classes
/// that have an obvious [`io::ErrorKind`].
fn to_io_error(error: reqwest::Error) -> BoxError {
    let kind = if error.is_timeout() {
        io::ErrorKind::TimedOut
    } else if error.is_connect() {
        io::ErrorKind::ConnectionRefused
    } else {
        io::ErrorKind::Other
    };
    Box::new(io::Error::new(kind, error))
}
