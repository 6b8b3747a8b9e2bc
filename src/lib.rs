//! bankd library
//!
//! Minimal banking backend: users own accounts, accounts hold fixed-point
//! balances, and the transaction engine mutates those balances atomically.

pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod query;
pub mod store;
pub mod validation;

pub use config::Config;
pub use domain::{Amount, Balance, DomainError, MoneyError};
pub use error::{AppError, AppResult};
