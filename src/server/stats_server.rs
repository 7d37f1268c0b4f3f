// src/server/stats_server.rs

use super::context::ServerContext;
use crate::core::metrics::gather_metrics;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// The envelope every JSON response is wrapped in.
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    result: T,
}

impl<T> ApiResponse<T> {
    fn ok(result: T) -> Json<Self> {
        Json(Self {
            success: true,
            result,
        })
    }
}

#[derive(Serialize)]
struct ServerStatsOutput {
    bytes_received: u64,
    bytes_sent: u64,
    total_errors: u64,
    connections: usize,
    server_started: DateTime<Utc>,
}

async fn api_version_handler() -> impl IntoResponse {
    ApiResponse::ok(env!("CARGO_PKG_VERSION"))
}

async fn stats_handler(State(ctx): State<Arc<ServerContext>>) -> impl IntoResponse {
    let overall = ctx.stats.query_overall();
    ApiResponse::ok(ServerStatsOutput {
        bytes_received: overall.received,
        bytes_sent: overall.sent,
        total_errors: overall.errors,
        connections: ctx.pool.len(),
        server_started: ctx.started_at,
    })
}

/// Handles HTTP requests to the /metrics endpoint.
async fn metrics_handler() -> impl IntoResponse {
    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Serves the read-only statistics API until the server shuts down.
pub(crate) async fn run_stats_server(ctx: Arc<ServerContext>, listener: TcpListener) {
    let shutdown = ctx.shutdown.clone();
    let app = Router::new()
        .route("/api_version", get(api_version_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(ctx);

    if let Ok(addr) = listener.local_addr() {
        info!("Stats server listening on http://{}/stats", addr);
    }

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Stats server shutting down.");
        })
        .await
    {
        error!("Stats server failed: {}", e);
    }
}
