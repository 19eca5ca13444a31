#![doc = include_str!("../README.md")]

mod config;
mod gauge;
mod mock_server;
mod scenario;
mod telemetry;

use clap::Parser;
use config::{CliArgs, RunConfig};
use telemetry::init_telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// mimalloc holds up better under contention, notably on musl.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = RunConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let server_token = CancellationToken::new();
    let target = match &config.target_url {
        Some(url) => url.clone(),
        None => {
            let addr = mock_server::spawn(config.mock_delay, server_token.clone()).await?;
            format!("http://{addr}/")
        }
    };

    let stop = CancellationToken::new();
    tokio::spawn(shutdown_signal(stop.clone()));

    let result = scenario::run(&config, &target, &stop).await;
    server_token.cancel();
    providers.shutdown();

    let report = result?;
    println!("{report}");

    if report.responses_leaked > 0 {
        anyhow::bail!("{} responses were never closed", report.responses_leaked);
    }
    Ok(())
}

fn log_startup_info(_config: &RunConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting callpool run with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting callpool run: {} requests over {} workers",
            _config.num_requests,
            _config.num_workers
        );
    }
}

async fn shutdown_signal(stop: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to install SIGTERM handler: {_e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to install Ctrl+C handler: {_e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    stop.cancel();
}
