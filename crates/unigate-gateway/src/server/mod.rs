//! Gateway HTTP surface
//!
//! Exposes the wire protocol over HTTP: a companion request channel
//! (`POST /servers/{server_id}/mcp`) and a persistent per-session
//! server-to-client event stream (`GET /servers/{server_id}/mcp`), plus a
//! liveness check and an observability-only statistics read.

mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::services::GatewayServices;

/// Header carrying the session id on follow-up requests. The stream endpoint
/// also accepts it as a `session_id` query parameter.
pub const SESSION_HEADER: &str = "x-unigate-session";

/// Build the axum router for the gateway surface.
pub fn build_router(services: Arc<GatewayServices>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(handlers::handle_health))
        .route("/stats", get(handlers::handle_stats))
        .route(
            "/servers/{server_id}/mcp",
            get(handlers::handle_stream).post(handlers::handle_post),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(services)
}

/// Serve the gateway until the shutdown token fires.
pub async fn run(services: Arc<GatewayServices>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = services.config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "[Server] Gateway listening");

    let router = build_router(services);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("[Server] Gateway stopped");
    Ok(())
}
