//! Response envelope
//!
//! Every endpoint answers with `{message, status, data?, errors?}`, where
//! `status` is `"success"` exactly when the HTTP code is 2xx. The error side
//! of the envelope is produced by `AppError::into_response`.

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

/// The wire envelope for success responses.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub message: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// A 2xx response carrying data.
pub fn success<T: Serialize>(
    status: StatusCode,
    message: &str,
    data: T,
) -> (StatusCode, Json<Envelope<T>>) {
    (
        status,
        Json(Envelope {
            message: message.to_string(),
            status: "success",
            data: Some(data),
        }),
    )
}

/// A 2xx response without a data payload.
pub fn success_empty(status: StatusCode, message: &str) -> (StatusCode, Json<Envelope<()>>) {
    (
        status,
        Json(Envelope {
            message: message.to_string(),
            status: "success",
            data: None,
        }),
    )
}
