//! Scripted in-memory transport used by the pool tests.
//!
//! Every response is a [`MockResponse`] that counts itself open on creation
//! and closed on drop, so a test can assert on leaks with
//! [`MockStats::open_responses`].

use crate::transport::{BoxError, Call, CallOptions, Callback, Transport};
use core::{fmt, time::Duration};
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::{io, sync::Arc};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
#[error("malformed status line")]
pub(crate) struct ProtocolError;

/// What a mock call does once enqueued.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Reply {
    /// Responds after `delay`, unless cancelled or timed out first.
    Respond(Duration),
    /// Fails with an `io::Error` of `kind` after `delay`.
    Fail(Duration, io::ErrorKind),
    /// Fails with a non-`io::Error` immediately.
    FailForeign,
    /// Never completes on its own.
    Hang,
    /// Responds after `delay` even if cancelled in the meantime.
    RespondIgnoringCancel(Duration),
    PanicOnCreate,
    PanicOnEnqueue,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct MockRequest {
    pub(crate) id: usize,
    pub(crate) reply: Reply,
}

impl MockRequest {
    pub(crate) const fn new(id: usize, reply: Reply) -> Self {
        Self { id, reply }
    }

    pub(crate) const fn respond_after(id: usize, millis: u64) -> Self {
        Self::new(id, Reply::Respond(Duration::from_millis(millis)))
    }
}

#[derive(Default)]
pub(crate) struct MockStats {
    pub(crate) calls_created: AtomicUsize,
    pub(crate) calls_started: AtomicUsize,
    pub(crate) cancels: AtomicUsize,
    inflight: AtomicUsize,
    max_inflight: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    pub(crate) start_order: Mutex<Vec<usize>>,
    pub(crate) timeouts: Mutex<Vec<Option<Duration>>>,
}

impl MockStats {
    fn enter(&self) {
        let now = self.inflight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_inflight.fetch_max(now, Ordering::AcqRel);
    }

    fn exit(&self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn started(&self) -> usize {
        self.calls_started.load(Ordering::Acquire)
    }

    pub(crate) fn max_inflight(&self) -> usize {
        self.max_inflight.load(Ordering::Acquire)
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::Acquire)
    }

    /// Responses created but not yet dropped.
    pub(crate) fn open_responses(&self) -> usize {
        self.opened() - self.closed()
    }

    /// Polls until at least `n` calls have been enqueued.
    pub(crate) async fn wait_started(&self, n: usize) {
        while self.started() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Polls until every response that was opened has been closed, giving
    /// late transport tasks time to finish.
    pub(crate) async fn wait_quiescent(&self) {
        for _ in 0..2_000 {
            if self.inflight.load(Ordering::Acquire) == 0 && self.open_responses() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

/// A response resource. Dropping it closes it.
pub(crate) struct MockResponse {
    pub(crate) id: usize,
    stats: Arc<MockStats>,
}

impl MockResponse {
    fn open(id: usize, stats: &Arc<MockStats>) -> Self {
        stats.opened.fetch_add(1, Ordering::AcqRel);
        Self {
            id,
            stats: Arc::clone(stats),
        }
    }
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockResponse").field("id", &self.id).finish()
    }
}

impl Drop for MockResponse {
    fn drop(&mut self) {
        self.stats.closed.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    pub(crate) stats: Arc<MockStats>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl Transport for MockTransport {
    type Request = MockRequest;
    type Response = MockResponse;
    type Call = MockCall;

    fn new_call(&self, request: MockRequest, options: &CallOptions) -> MockCall {
        self.stats.calls_created.fetch_add(1, Ordering::AcqRel);
        self.stats.timeouts.lock().push(options.timeout);
        if let Reply::PanicOnCreate = request.reply {
            panic!("mock client is shut down");
        }
        MockCall {
            request,
            timeout: options.timeout,
            stats: Arc::clone(&self.stats),
            token: CancellationToken::new(),
            enqueued: AtomicBool::new(false),
        }
    }
}

pub(crate) struct MockCall {
    request: MockRequest,
    timeout: Option<Duration>,
    stats: Arc<MockStats>,
    token: CancellationToken,
    enqueued: AtomicBool,
}

impl Call for MockCall {
    type Response = MockResponse;

    fn enqueue(&self, callback: Box<dyn Callback<MockResponse>>) {
        if self.enqueued.swap(true, Ordering::AcqRel) {
            callback.on_failure(Box::new(io::Error::other("already enqueued")));
            return;
        }
        if let Reply::PanicOnEnqueue = self.request.reply {
            panic!("mock dispatcher rejected the call");
        }

        self.stats.calls_started.fetch_add(1, Ordering::AcqRel);
        self.stats.start_order.lock().push(self.request.id);

        let MockRequest { id, reply } = self.request;
        let timeout = self.timeout;
        let stats = Arc::clone(&self.stats);
        let token = self.token.clone();
        tokio::spawn(async move {
            stats.enter();
            let outcome = run(reply, timeout, &token).await;
            stats.exit();
            match outcome {
                Ok(()) => callback.on_response(MockResponse::open(id, &stats)),
                Err(e) => callback.on_failure(e),
            }
        });
    }

    fn cancel(&self) {
        if !self.token.is_cancelled() {
            self.stats.cancels.fetch_add(1, Ordering::AcqRel);
        }
        self.token.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => core::future::pending().await,
    }
}

async fn run(
    reply: Reply,
    timeout: Option<Duration>,
    token: &CancellationToken,
) -> Result<(), BoxError> {
    let (delay, result): (Option<Duration>, Result<(), BoxError>) = match reply {
        Reply::Respond(delay) => (Some(delay), Ok(())),
        Reply::Fail(delay, kind) => (Some(delay), Err(Box::new(io::Error::from(kind)) as BoxError)),
        Reply::FailForeign => (Some(Duration::ZERO), Err(Box::new(ProtocolError) as BoxError)),
        Reply::Hang => (None, Ok(())),
        Reply::RespondIgnoringCancel(delay) => {
            tokio::time::sleep(delay).await;
            return Ok(());
        }
        Reply::PanicOnCreate | Reply::PanicOnEnqueue => unreachable!(),
    };

    tokio::select! {
        biased;
        () = token.cancelled() => Err(Box::new(io::Error::other("Canceled")) as BoxError),
        () = sleep_or_forever(timeout) => {
            Err(Box::new(io::Error::from(io::ErrorKind::TimedOut)) as BoxError)
        }
        () = sleep_or_forever(delay) => result,
    }
}
