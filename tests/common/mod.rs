//! Common test utilities
//!
//! Spin up the full application over the in-memory store and drive it with
//! `tower::ServiceExt::oneshot`, asserting on the response envelope.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::util::ServiceExt;

use bankd::api;
use bankd::store::MemoryLedgerStore;

/// Build the application over a fresh in-memory store.
pub fn test_app() -> Router {
    api::build_app(MemoryLedgerStore::new())
}

/// Send one request. `user` becomes the `X-User-Id` header the external
/// auth layer would normally supply.
pub async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<i64>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user_id) = user {
        builder = builder.header("X-User-Id", user_id.to_string());
    }

    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Sign up a user through the API and return their id.
pub async fn signup(app: &Router, username: &str) -> i64 {
    let (status, body) = request(
        app,
        "POST",
        "/api/users",
        None,
        Some(serde_json::json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "opaque-credential",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "signup failed: {body}");
    body["data"]["id"].as_i64().expect("user id in response")
}

/// Create an account for `user` and return its id.
pub async fn create_account(app: &Router, user: i64, account_type: &str) -> i64 {
    let (status, body) = request(
        app,
        "POST",
        "/api/accounts",
        Some(user),
        Some(serde_json::json!({ "account_type": account_type })),
    )
    .await;
    assert_eq!(
        status,
        StatusCode::CREATED,
        "account creation failed: {body}"
    );
    body["data"]["id"].as_i64().expect("account id in response")
}

/// Deposit into an owned account, asserting success.
pub async fn deposit(app: &Router, user: i64, account_id: i64, amount: &str) {
    let (status, body) = request(
        app,
        "POST",
        "/api/transactions",
        Some(user),
        Some(serde_json::json!({
            "type": "deposit",
            "account_id": account_id,
            "amount": amount,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "deposit failed: {body}");
}
