//! The leak scenario: submit a burst of requests, walk away from their
//! waiters, close the pool, and count what is left open.

use crate::{
    config::RunConfig,
    gauge::{Gauged, GaugedTransport},
};
use anyhow::Context;
use callpool::{Error, HttpTransport, PoolConfig, WorkerPool, WorkerResult};
use core::{fmt, time::Duration};
use portable_atomic::{AtomicUsize, Ordering};
use std::{sync::Arc, time::Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type Outcome = callpool::Result<WorkerResult<Gauged<reqwest::Response>>>;

/// How long late responses get to arrive and be released after the pool
/// terminated.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct Tally {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
}

impl Tally {
    fn record(&self, _id: usize, outcome: Outcome) {
        match outcome {
            Ok(WorkerResult::Success(response)) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                drop(response);
            }
            Ok(WorkerResult::Error(_e)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "tracing")]
                tracing::debug!("[{_id}] Result: {_e}");
            }
            Err(Error::Cancelled) => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("[{_id}] Unexpected pool error: {_e}");
            }
        }
    }
}

/// Counts gathered over one run.
#[derive(Debug, Default)]
pub struct Report {
    pub submitted: usize,
    pub rejected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub abandoned: usize,
    pub responses_opened: usize,
    pub responses_leaked: usize,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "submitted:         {}", self.submitted)?;
        writeln!(f, "rejected:          {}", self.rejected)?;
        writeln!(f, "succeeded:         {}", self.succeeded)?;
        writeln!(f, "failed:            {}", self.failed)?;
        writeln!(f, "cancelled:         {}", self.cancelled)?;
        writeln!(f, "abandoned waiters: {}", self.abandoned)?;
        writeln!(f, "responses opened:  {}", self.responses_opened)?;
        writeln!(f, "responses leaked:  {}", self.responses_leaked)?;
        if self.interrupted {
            writeln!(f, "interrupted:       yes")?;
        }
        write!(f, "elapsed:           {:?}", self.elapsed)
    }
}

/// Runs the scenario against `target`. Cancelling `stop` skips the remaining
/// wait and closes the pool abruptly.
pub async fn run(
    config: &RunConfig,
    target: &str,
    stop: &CancellationToken,
) -> anyhow::Result<Report> {
    let url = reqwest::Url::parse(target).with_context(|| format!("invalid target URL {target}"))?;
    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let transport = GaugedTransport::new(HttpTransport::new(client));
    let gauge = transport.gauge();

    let mut pool_config = PoolConfig::new(config.num_workers);
    if let Some(capacity) = config.queue_capacity {
        pool_config = pool_config.with_queue_capacity(capacity);
    }
    let pool = WorkerPool::with_config(transport, pool_config)?;
    pool.start_workers()?;

    let started = Instant::now();
    let tally = Arc::new(Tally::default());
    let mut report = Report::default();
    let mut waiters = JoinSet::new();

    for id in 0..config.num_requests {
        let request = reqwest::Request::new(reqwest::Method::GET, url.clone());
        let handle = match pool.submit(request, config.timeout_ms) {
            Ok(handle) => handle,
            Err(_e) => {
                report.rejected += 1;
                #[cfg(feature = "tracing")]
                tracing::trace!("[{id}] Rejected: {_e}");
                continue;
            }
        };
        report.submitted += 1;

        let tally = Arc::clone(&tally);
        let waiter = waiters.spawn(async move { tally.record(id, handle.await) });
        if !config.keep_waiters {
            waiter.abort();
        }
    }

    #[cfg(feature = "tracing")]
    tracing::info!(
        "Submitted {} requests ({} rejected), closing in {:?}",
        report.submitted,
        report.rejected,
        config.abort_after
    );

    tokio::select! {
        () = tokio::time::sleep(config.abort_after) => {}
        () = stop.cancelled() => report.interrupted = true,
    }

    let immediately = report.interrupted || !config.graceful;
    pool.close(immediately);

    while let Some(joined) = waiters.join_next().await {
        if joined.is_err() {
            report.abandoned += 1;
        }
    }
    pool.terminated().await;

    // Transport tasks for cancelled calls may still be unwinding.
    let _ = tokio::time::timeout(SETTLE_TIMEOUT, async {
        while gauge.open() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    report.succeeded = tally.succeeded.load(Ordering::Relaxed);
    report.failed = tally.failed.load(Ordering::Relaxed);
    report.cancelled = tally.cancelled.load(Ordering::Relaxed);
    report.responses_opened = gauge.opened();
    report.responses_leaked = gauge.open();
    report.elapsed = started.elapsed();
    Ok(report)
}
