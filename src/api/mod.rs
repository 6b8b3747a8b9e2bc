//! API module
//!
//! HTTP API endpoints, middleware, and the response envelope.

pub mod middleware;
pub mod response;
pub mod routes;

pub use routes::create_router;

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::store::LedgerStore;

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Assemble the full application: health check, `/api` routes, request
/// logging, and HTTP tracing, with the given store as state.
pub fn build_app<S: LedgerStore>(store: S) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", create_router::<S>())
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}
