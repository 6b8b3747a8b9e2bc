//! Validation layer
//!
//! Pure parse/constrain functions turning raw, untyped request payloads into
//! typed commands. No side effects; a command either comes out fully formed
//! or the request is rejected with a [`ValidationError`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::domain::{AccountType, Amount};

/// Malformed or missing input (HTTP 400).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

// =========================================================================
// Raw request bodies
// =========================================================================

/// Raw body of `POST /api/transactions`. Everything optional so malformed
/// requests surface as validation failures, not deserialization failures.
#[derive(Debug, Default, Deserialize)]
pub struct TransactionBody {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub account_id: Option<serde_json::Value>,
    pub amount: Option<serde_json::Value>,
    pub to_account_id: Option<serde_json::Value>,
    pub description: Option<String>,
}

/// Raw body of `POST /api/accounts` and `PUT /api/accounts/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct AccountBody {
    pub account_type: Option<String>,
}

/// Raw body of `POST /api/users`.
#[derive(Debug, Default, Deserialize)]
pub struct SignupBody {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Raw body of `PUT /api/users/me`.
#[derive(Debug, Default, Deserialize)]
pub struct ProfileUpdateBody {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Raw query string of `GET /api/transactions`.
#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    pub account_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

// =========================================================================
// Typed commands
// =========================================================================

/// Validated deposit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositCommand {
    pub amount: Amount,
    pub description: Option<String>,
}

impl DepositCommand {
    pub fn parse(body: &TransactionBody) -> Result<Self, ValidationError> {
        Ok(Self {
            amount: parse_amount(body.amount.as_ref())?,
            description: body.description.clone(),
        })
    }
}

/// Validated withdrawal request. Same field rules as a deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawCommand {
    pub amount: Amount,
    pub description: Option<String>,
}

impl WithdrawCommand {
    pub fn parse(body: &TransactionBody) -> Result<Self, ValidationError> {
        Ok(Self {
            amount: parse_amount(body.amount.as_ref())?,
            description: body.description.clone(),
        })
    }
}

/// Validated transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCommand {
    pub amount: Amount,
    pub to_account_id: i64,
    pub description: Option<String>,
}

impl TransferCommand {
    pub fn parse(body: &TransactionBody) -> Result<Self, ValidationError> {
        let amount = parse_amount(body.amount.as_ref())?;
        let to_account_id = parse_id(body.to_account_id.as_ref())
            .ok_or_else(|| ValidationError::new("invalid or missing to_account_id"))?;
        Ok(Self {
            amount,
            to_account_id,
            description: body.description.clone(),
        })
    }
}

/// Validated account create/update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountCommand {
    pub account_type: AccountType,
}

impl AccountCommand {
    pub fn parse(body: &AccountBody) -> Result<Self, ValidationError> {
        let raw = body
            .account_type
            .as_deref()
            .ok_or_else(|| ValidationError::new("account_type is required"))?;
        let account_type = raw.parse::<AccountType>().map_err(|_| {
            ValidationError::new("account_type must be either 'checking' or 'savings'")
        })?;
        Ok(Self { account_type })
    }
}

/// Validated signup request. The credential is opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupCommand {
    pub username: String,
    pub email: String,
    pub credential: String,
}

impl SignupCommand {
    pub fn parse(body: &SignupBody) -> Result<Self, ValidationError> {
        let username = require_text(body.username.as_deref(), "username")?;
        let email = require_text(body.email.as_deref(), "email")?;
        let credential = require_text(body.password.as_deref(), "password")?;
        Ok(Self {
            username,
            email,
            credential,
        })
    }
}

/// Validated profile update. Username is immutable; a request that tries to
/// set it is rejected rather than silently ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdateCommand {
    pub email: Option<String>,
    pub credential: Option<String>,
}

impl ProfileUpdateCommand {
    pub fn parse(body: &ProfileUpdateBody) -> Result<Self, ValidationError> {
        if body.username.is_some() {
            return Err(ValidationError::new("username field cannot be modified"));
        }
        Ok(Self {
            email: body.email.clone(),
            credential: body.password.clone(),
        })
    }
}

/// Validated history filter. All fields optional; malformed individual
/// fields are dropped rather than failing the whole request, preserving the
/// rest of the filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub account_id: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    pub fn parse(query: &FilterQuery) -> Self {
        Self {
            account_id: query.account_id.as_deref().and_then(|s| s.parse().ok()),
            start_date: query.start_date.as_deref().and_then(parse_date),
            end_date: query.end_date.as_deref().and_then(parse_date),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.account_id.is_none() && self.start_date.is_none() && self.end_date.is_none()
    }
}

// =========================================================================
// Field parsers
// =========================================================================

/// Accepts a JSON string or number; requires a strictly positive decimal
/// with at most 2 fractional digits.
fn parse_amount(value: Option<&serde_json::Value>) -> Result<Amount, ValidationError> {
    let value = value.ok_or_else(|| ValidationError::new("amount is required"))?;

    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return Err(ValidationError::new("amount must be a decimal value")),
    };

    let decimal = Decimal::from_str(text.trim())
        .map_err(|_| ValidationError::new("amount must be a decimal value"))?;
    Amount::new(decimal)
        .map_err(|e| ValidationError::new(format!("invalid amount: {e}")))
}

/// Accepts a JSON integer or a string of digits.
pub fn parse_id(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn require_text(value: Option<&str>, field: &str) -> Result<String, ValidationError> {
    match value {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(ValidationError::new(format!("{field} is required"))),
    }
}

/// ISO-8601 timestamps; values without an offset are interpreted as UTC,
/// bare dates as midnight UTC.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }

    None
}
