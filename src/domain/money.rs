//! Monetary types
//!
//! Fixed-point money primitives validated at construction time, so invalid
//! values cannot exist inside the engine. All arithmetic is decimal; floats
//! never enter balance computation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum representable monetary value (one billion, scale 2).
const MAX_AMOUNT: &str = "1000000000";

/// Monetary amounts carry at most 2 fractional digits.
const MAX_SCALE: u32 = 2;

/// A validated, strictly positive monetary amount.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - At most 2 decimal places
/// - Never exceeds [`MAX_AMOUNT`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

/// Errors that can occur when constructing an [`Amount`] or [`Balance`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("amount has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("amount exceeds maximum allowed value ({MAX_AMOUNT})")]
    Overflow,

    #[error("balance may not go negative")]
    NegativeBalance,

    #[error("invalid amount format: {0}")]
    Parse(String),
}

impl Amount {
    /// Create a new Amount with validation. The value is normalized to
    /// scale 2 so `5` and `5.00` compare and store identically.
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value <= Decimal::ZERO {
            return Err(MoneyError::NotPositive(value));
        }

        if value.scale() > MAX_SCALE {
            return Err(MoneyError::TooManyDecimals(value.scale()));
        }

        let max = Decimal::from_str(MAX_AMOUNT).expect("invalid MAX_AMOUNT constant");
        if value > max {
            return Err(MoneyError::Overflow);
        }

        let mut value = value;
        value.rescale(MAX_SCALE);
        Ok(Self(value))
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s.trim()).map_err(|e| MoneyError::Parse(e.to_string()))?;
        Amount::new(decimal)
    }
}

impl TryFrom<String> for Amount {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Amount::from_str(&value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.0.to_string()
    }
}

/// An account balance: zero or positive, scale 2.
///
/// Unlike [`Amount`] a Balance can be zero, and it only changes through
/// [`Balance::credit`] and [`Balance::debit`], which re-validate the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Balance(Decimal);

impl Balance {
    /// Create a new balance (zero or positive).
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value < Decimal::ZERO {
            return Err(MoneyError::NegativeBalance);
        }

        let max = Decimal::from_str(MAX_AMOUNT).expect("invalid MAX_AMOUNT constant");
        if value > max {
            return Err(MoneyError::Overflow);
        }

        let mut value = value;
        value.rescale(MAX_SCALE);
        Ok(Self(value))
    }

    /// The opening balance of a freshly created account.
    pub fn zero() -> Self {
        Self(Decimal::new(0, MAX_SCALE))
    }

    /// Get the underlying value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Whether this balance covers a debit of `amount`.
    pub fn is_sufficient_for(&self, amount: &Amount) -> bool {
        self.0 >= amount.value()
    }

    /// Add an amount to the balance.
    pub fn credit(&self, amount: &Amount) -> Result<Balance, MoneyError> {
        Balance::new(self.0 + amount.value())
    }

    /// Subtract an amount from the balance. Fails with
    /// [`MoneyError::NegativeBalance`] when the balance does not cover it.
    pub fn debit(&self, amount: &Amount) -> Result<Balance, MoneyError> {
        Balance::new(self.0 - amount.value())
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::zero()
    }
}
