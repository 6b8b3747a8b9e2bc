//! Query layer
//!
//! Read-only history retrieval scoped to the caller's owned accounts.
//! Results come back newest first; there is no pagination in this core.

use crate::domain::{DomainError, Transaction};
use crate::error::AppResult;
use crate::store::LedgerStore;
use crate::validation::TransactionFilter;

/// Ownership-scoped transaction history.
#[derive(Debug, Clone)]
pub struct TransactionQuery<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> TransactionQuery<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Transactions touching any of the caller's accounts, optionally
    /// narrowed to a single owned account and/or an inclusive `created_at`
    /// range. A caller with no accounts gets an empty list.
    pub async fn list(
        &self,
        user_id: i64,
        filter: TransactionFilter,
    ) -> AppResult<Vec<Transaction>> {
        let accounts = self.store.list_accounts_by_user(user_id).await?;
        if accounts.is_empty() {
            return Ok(Vec::new());
        }
        let account_ids: Vec<i64> = accounts.iter().map(|a| a.id).collect();

        if let Some(account_id) = filter.account_id {
            if !account_ids.contains(&account_id) {
                return Err(DomainError::AccountNotFound.into());
            }
        }

        Ok(self.store.list_transactions(&account_ids, &filter).await?)
    }

    /// A single transaction, visible only when it touches one of the
    /// caller's accounts.
    pub async fn get(&self, user_id: i64, transaction_id: i64) -> AppResult<Transaction> {
        let accounts = self.store.list_accounts_by_user(user_id).await?;
        if accounts.is_empty() {
            return Err(DomainError::TransactionNotFound.into());
        }
        let account_ids: Vec<i64> = accounts.iter().map(|a| a.id).collect();

        self.store
            .get_transaction_for_accounts(transaction_id, &account_ids)
            .await?
            .ok_or_else(|| DomainError::TransactionNotFound.into())
    }
}
