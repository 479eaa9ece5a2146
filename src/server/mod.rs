/// HTTP API for the integrity subsystem.
///
/// A thin routing layer over [`IntegrityService`]: handlers parse the
/// request, call one service operation and map the result to a response.
/// Report intake persists the report and hands anchoring to the
/// background [`AnchorQueue`], so the response never waits on the ledger.
///
/// There is no authentication here. Mutating routes require an `X-Actor`
/// header naming the acting principal, which is passed through to the
/// service and recorded in its logs.
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{IntegrityError, Result};
use crate::service::IntegrityService;
use crate::worker::AnchorQueue;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IntegrityService>,
    pub queue: AnchorQueue,
}

/// Build the Axum application with all routes and middleware.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::report_routes())
        .merge(routes::search_routes())
        .with_state(Arc::new(state))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve on an already-bound listener until the process is interrupted.
pub async fn serve_on(state: AppState, listener: tokio::net::TcpListener) -> Result<()> {
    let app = build_app(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(IntegrityError::Io)
}

/// Start the API server.
pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(IntegrityError::Io)?;

    tracing::info!("evidence-anchor API listening on {addr}");
    serve_on(state, listener).await
}
