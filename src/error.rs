//! Error handling module
//!
//! Centralized error types and HTTP response conversion. Every failure
//! renders as the `{message, status, errors}` envelope clients receive for
//! success responses too.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::config::ConfigError;
use crate::domain::DomainError;
use crate::store::StoreError;
use crate::validation::ValidationError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Duplicate value for a unique field (username, email, account number).
    #[error("duplicate {0}")]
    Conflict(&'static str),

    #[error("authentication required")]
    Unauthenticated,

    // Server errors (5xx)
    #[error("store error")]
    Store(#[source] StoreError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(field) => AppError::Conflict(field),
            other => AppError::Store(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, detail) = match &self {
            AppError::Validation(err) => (
                StatusCode::BAD_REQUEST,
                "Invalid input data",
                err.to_string(),
            ),

            AppError::Domain(domain_err) => match domain_err {
                DomainError::InsufficientFunds { .. } => (
                    StatusCode::BAD_REQUEST,
                    "Insufficient funds",
                    "Your account balance is insufficient for this transaction".to_string(),
                ),
                DomainError::SelfTransfer => (
                    StatusCode::BAD_REQUEST,
                    "Invalid transfer",
                    "Cannot transfer to the same account".to_string(),
                ),
                DomainError::UserNotFound => (
                    StatusCode::NOT_FOUND,
                    "User not found",
                    "The requested user does not exist".to_string(),
                ),
                DomainError::AccountNotFound => (
                    StatusCode::NOT_FOUND,
                    "Account not found",
                    "The requested account does not exist or you don't have access to it"
                        .to_string(),
                ),
                DomainError::TransactionNotFound => (
                    StatusCode::NOT_FOUND,
                    "Transaction not found",
                    "The specified transaction does not exist or you don't have access to it"
                        .to_string(),
                ),
            },

            AppError::Conflict(field) => {
                let message = match *field {
                    "username" => "Username already exists",
                    "email" => "Email already exists",
                    _ => "Database integrity error",
                };
                (
                    StatusCode::CONFLICT,
                    message,
                    format!("The {field} is already in use"),
                )
            }

            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "Authentication required",
                "A valid authenticated user id must accompany the request".to_string(),
            ),

            AppError::Store(err) => {
                tracing::error!("store error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error occurred",
                    "An error occurred while processing the request".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    "An unexpected error occurred".to_string(),
                )
            }
            AppError::Config(err) => {
                tracing::error!("config error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "message": message,
            "status": "error",
            "errors": { "message": detail },
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(AppError::Validation(ValidationError("bad".into()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DomainError::insufficient_funds(dec!(10.00), dec!(5.00)).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DomainError::SelfTransfer.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DomainError::AccountNotFound.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::Conflict("username")),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(AppError::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(AppError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_duplicate_becomes_conflict() {
        let err: AppError = StoreError::Duplicate("email").into();
        assert!(matches!(err, AppError::Conflict("email")));
    }

    #[test]
    fn test_store_database_error_is_500() {
        let err: AppError = StoreError::Corrupt("bad row".into()).into();
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
