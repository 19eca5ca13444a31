use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `callpool` stress driver.
///
/// The defaults reproduce the leak scenario the pool is built to survive: ten
/// thousand submissions whose waiters are cancelled right away, followed by an
/// abrupt close shortly after. Every value can be set from a CLI flag, an
/// environment variable, or a `.env` file.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "callpool",
    version,
    about = "Floods a callpool worker pool with HTTP calls and reports leaked responses"
)]
pub struct CliArgs {
    /// URL every request is sent to.
    ///
    /// When unset, an in-process mock server is started on a random local port
    /// and answers each request after `MOCK_DELAY_MS`.
    ///
    /// Environment variable: `TARGET_URL`
    #[arg(long, env = "TARGET_URL")]
    pub target_url: Option<String>,

    /// Number of workers, and therefore the maximum number of requests in
    /// flight at once.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 4)]
    pub num_workers: usize,

    /// Number of requests submitted to the pool.
    ///
    /// Environment variable: `NUM_REQUESTS`
    #[arg(long, env = "NUM_REQUESTS", default_value_t = 10_000)]
    pub num_requests: usize,

    /// Per-request timeout in milliseconds. Zero or negative keeps the HTTP
    /// client's default.
    ///
    /// Environment variable: `TIMEOUT_MS`
    #[arg(long, env = "TIMEOUT_MS", default_value_t = -1, allow_negative_numbers = true)]
    pub timeout_ms: i64,

    /// Maximum number of queued requests. Unbounded when unset; submissions
    /// beyond the bound are rejected and counted.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[arg(long, env = "QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Delay before the mock server answers, in milliseconds. Ignored when
    /// `TARGET_URL` is set.
    ///
    /// Environment variable: `MOCK_DELAY_MS`
    #[arg(long, env = "MOCK_DELAY_MS", default_value_t = 10)]
    pub mock_delay_ms: u64,

    /// Time between the last submission and closing the pool, in milliseconds.
    ///
    /// Environment variable: `ABORT_AFTER_MS`
    #[arg(long, env = "ABORT_AFTER_MS", default_value_t = 50)]
    pub abort_after_ms: u64,

    /// Keep waiting for results instead of cancelling every waiter right after
    /// submission.
    #[arg(long, default_value_t = false)]
    pub keep_waiters: bool,

    /// Close the pool gracefully (drain the queue) instead of abruptly.
    #[arg(long, default_value_t = false)]
    pub graceful: bool,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target_url: Option<String>,
    pub num_workers: usize,
    pub num_requests: usize,
    pub timeout_ms: i64,
    pub queue_capacity: Option<usize>,
    pub mock_delay: Duration,
    pub abort_after: Duration,
    pub keep_waiters: bool,
    pub graceful: bool,
}

impl TryFrom<CliArgs> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.queue_capacity == Some(0) {
            bail!("QUEUE_CAPACITY must be greater than 0 when set");
        }

        if let Some(url) = &args.target_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("TARGET_URL ({url}) must be an http:// or https:// URL");
            }
        }

        Ok(Self {
            target_url: args.target_url,
            num_workers: args.num_workers,
            num_requests: args.num_requests,
            timeout_ms: args.timeout_ms,
            queue_capacity: args.queue_capacity,
            mock_delay: Duration::from_millis(args.mock_delay_ms),
            abort_after: Duration::from_millis(args.abort_after_ms),
            keep_waiters: args.keep_waiters,
            graceful: args.graceful,
        })
    }
}
