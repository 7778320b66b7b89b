pub mod handler;
pub mod quota;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;

use crate::infrastructure::shutdown::ShutdownListener;

pub use handler::ProxyState;
pub use quota::{DailyQuota, SystemClock};

/// Captured regions are a few hundred KiB once base64-encoded.
const MAX_BODY_BYTES: usize = 12 * 1024 * 1024;

pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .route("/health", get(handler::health))
        .route(
            "/api/analyze",
            post(handler::analyze).fallback(handler::method_not_allowed),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

pub async fn serve(
    bind: SocketAddr,
    state: ProxyState,
    mut shutdown: ShutdownListener,
) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind analysis proxy on {bind}"))?;
    let local = listener.local_addr()?;
    tracing::info!(target: "proxy", addr = %local, "analysis proxy listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let reason = shutdown.notified().await;
            tracing::info!(target: "proxy", ?reason, "draining analysis proxy");
        })
        .await
        .context("analysis proxy stopped with an error")?;

    tracing::info!(target: "proxy", "analysis proxy stopped");
    Ok(())
}
