//! API middleware
//!
//! Authenticated-caller extraction and request logging. Token verification
//! itself is an external collaborator's job; by the time a request reaches
//! this service the gateway has resolved the caller and forwarded their id
//! in the `X-User-Id` header.

use axum::{body::Body, extract::Request, http::HeaderMap, middleware::Next, response::Response};
use uuid::Uuid;

use crate::error::AppError;

/// The caller, as vouched for by the external auth layer.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: i64,
}

/// Correlation id attached to every request for log stitching.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Extract the authenticated user id from `X-User-Id`. Absent or malformed
/// values are rejected before any handler runs.
pub async fn auth_middleware(
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = headers
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or(AppError::Unauthenticated)?;

    request
        .extensions_mut()
        .insert(AuthenticatedUser { user_id });

    Ok(next.run(request).await)
}

/// Request logging middleware. Honors an incoming `X-Request-Id` and
/// generates one otherwise.
pub async fn logging_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("X-Request-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    request.extensions_mut().insert(RequestId(request_id));

    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        request_id = %request_id,
        "incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        request_id = %request_id,
        "request completed"
    );

    response
}
