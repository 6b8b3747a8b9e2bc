//! Domain error types
//!
//! Pure business-rule failures, independent of the web and storage layers.

use thiserror::Error;

/// Business rule violations detected before any mutation is applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Debit would exceed the account balance.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    /// Transfer where source and destination are the same account.
    #[error("cannot transfer to the same account")]
    SelfTransfer,

    /// User absent from the store.
    #[error("user not found")]
    UserNotFound,

    /// Account absent, or not owned by the caller where ownership applies.
    #[error("account not found")]
    AccountNotFound,

    /// Transaction absent, or touching none of the caller's accounts.
    #[error("transaction not found")]
    TransactionNotFound,
}

impl DomainError {
    pub fn insufficient_funds(
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    ) -> Self {
        Self::InsufficientFunds {
            required,
            available,
        }
    }

    /// Whether the failure maps to a missing resource (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UserNotFound | Self::AccountNotFound | Self::TransactionNotFound
        )
    }
}
