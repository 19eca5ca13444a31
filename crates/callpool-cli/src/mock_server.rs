use axum::{Router, routing::get};
use core::time::Duration;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Starts a local HTTP server that answers every `GET /` with a short body
/// after `delay`. It stops once `shutdown` is cancelled.
pub async fn spawn(delay: Duration, shutdown: CancellationToken) -> anyhow::Result<SocketAddr> {
    let app = Router::new().route(
        "/",
        get(move || async move {
            tokio::time::sleep(delay).await;
            "Toto"
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
        if let Err(_e) = served {
            #[cfg(feature = "tracing")]
            tracing::error!("Mock server failed: {_e}");
        }
    });

    #[cfg(feature = "tracing")]
    tracing::debug!("Mock server listening on {addr} (delay {delay:?})");
    Ok(addr)
}
