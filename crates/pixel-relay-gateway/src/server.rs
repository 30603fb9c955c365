//! Axum-based relay server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::connection::canvas_ws_handler;
use crate::state::RelayState;

/// Build the relay router: the canvas channel, `/health`, and `/metrics`
/// when the `metrics` feature is enabled.
pub fn build_router(state: Arc<RelayState>) -> anyhow::Result<Router> {
    let path = state.config.channel_path();
    if !path.starts_with('/') {
        anyhow::bail!("channel path '{path}' must start with '/'");
    }
    if path == "/health" || path == "/metrics" {
        anyhow::bail!("channel path '{path}' collides with a built-in route");
    }

    let app = Router::new()
        .route(&path, get(canvas_ws_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    let cors = state.config.cors_enabled();
    let mut app = app.with_state(state).layer(TraceLayer::new_for_http());
    if cors {
        app = app.layer(CorsLayer::permissive());
    }

    Ok(app)
}

/// Serve the relay on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<RelayState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let path = state.config.channel_path();
    let app = build_router(state)?;

    let addr = listener.local_addr()?;
    info!("Canvas relay listening on ws://{addr}{path}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

/// Start the relay server on the configured bind address.
pub async fn start_relay(state: Arc<RelayState>, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{port}", state.config.bind_addr());
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, state, shutdown_signal()).await
}

async fn health_handler(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let store = state.relay.store();

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "peers": state.relay.peer_count(),
        "events": store.len(),
        "started_at": state.started_at.to_rfc3339(),
        "last_draw_at": store.last_draw_at().map(|t| t.to_rfc3339()),
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<RelayState>>) -> axum::response::Response {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => axum::http::StatusCode::NOT_FOUND.into_response(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
