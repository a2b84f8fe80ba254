//! The HTTP surface: CRUD + export + SSE event stream + stats, per §4.H/§6.
//!
//! Grounded in the teacher's `api::mod::spawn_api_server`: build an Axum
//! `Router`, layer CORS and tracing, bind a `TcpListener`, and run
//! `axum::serve` in a background task. No auth layer and no static
//! dashboard serving survive the transform: the spec's non-goals exclude
//! authentication outright, and the browser dashboard is an external
//! collaborator, not something this crate serves.

pub mod error;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/monitors", get(routes::monitors::list_monitors))
        .route("/api/monitors/create", axum::routing::post(routes::monitors::create_monitor))
        .route("/api/monitors/export", get(routes::export::export_monitors))
        .route(
            "/api/monitor",
            get(routes::monitors::get_monitor)
                .put(routes::monitors::update_monitor)
                .delete(routes::monitors::delete_monitor),
        )
        .route("/api/stats", get(routes::stats::get_stats))
        .route("/api/response-time", get(routes::stats::get_response_time))
        .route("/api/events", get(routes::events::events_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new().gzip(true))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Binds `bind_addr` and runs the router in a background task, returning
/// the address actually bound (useful when `bind_addr`'s port is 0, as in
/// tests).
pub async fn spawn_api_server(bind_addr: SocketAddr, state: ApiState) -> anyhow::Result<SocketAddr> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "API server error");
        }
    });

    Ok(addr)
}
