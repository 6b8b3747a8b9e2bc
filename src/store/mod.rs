//! Ledger store
//!
//! The persistence boundary of the core. The engine and query layer depend
//! only on the [`LedgerStore`] / [`LedgerTx`] contract, never on a concrete
//! storage engine. Two adapters are provided: Postgres for production and an
//! in-memory store for tests and ephemeral runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::{Account, AccountType, Amount, Balance, Transaction, TransactionType, User};
use crate::validation::TransactionFilter;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Storage-layer failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique-constraint violation; the field names the offending column.
    #[error("duplicate value for unique field: {0}")]
    Duplicate(&'static str),

    /// A persisted row no longer satisfies domain invariants.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Insert payload for a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub credential: String,
}

/// Partial update for a user profile. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub credential: Option<String>,
}

/// Insert payload for a new account. Balance always starts at zero.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: i64,
    pub account_type: AccountType,
    pub account_number: String,
}

/// Insert payload for a transaction row.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub from_account_id: Option<i64>,
    pub to_account_id: Option<i64>,
    pub amount: Amount,
    pub kind: TransactionType,
    pub description: Option<String>,
}

/// Read side of the ledger plus the entry point into a unit of work.
#[async_trait]
pub trait LedgerStore: Clone + Send + Sync + 'static {
    type Tx: LedgerTx;

    /// Open a unit of work. All balance mutations happen inside one.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;
    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<Option<User>, StoreError>;

    async fn get_account(&self, id: i64) -> Result<Option<Account>, StoreError>;
    /// The account only if it exists AND belongs to `user_id`.
    async fn get_owned_account(
        &self,
        user_id: i64,
        account_id: i64,
    ) -> Result<Option<Account>, StoreError>;
    async fn list_accounts_by_user(&self, user_id: i64) -> Result<Vec<Account>, StoreError>;
    async fn find_account_by_number(&self, number: &str) -> Result<Option<Account>, StoreError>;

    /// Transactions touching any of `account_ids`, narrowed by the filter,
    /// newest first (ties broken by id descending).
    async fn list_transactions(
        &self,
        account_ids: &[i64],
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// A single transaction, visible only when it touches one of
    /// `account_ids`.
    async fn get_transaction_for_accounts(
        &self,
        transaction_id: i64,
        account_ids: &[i64],
    ) -> Result<Option<Transaction>, StoreError>;
}

/// One atomic unit of work against the ledger.
///
/// Balance mutations and the transaction row they record must commit
/// together or not at all. Locks taken by `lock_*` are held until
/// [`commit`](LedgerTx::commit) or [`rollback`](LedgerTx::rollback);
/// dropping an uncommitted unit of work rolls it back.
#[async_trait]
pub trait LedgerTx: Send {
    /// Load an account and lock it against concurrent balance mutation.
    async fn lock_account(&mut self, id: i64) -> Result<Option<Account>, StoreError>;

    /// Like [`lock_account`](LedgerTx::lock_account), but only when the
    /// account belongs to `user_id`.
    async fn lock_owned_account(
        &mut self,
        user_id: i64,
        account_id: i64,
    ) -> Result<Option<Account>, StoreError>;

    async fn get_user(&mut self, id: i64) -> Result<Option<User>, StoreError>;

    async fn insert_account(&mut self, account: NewAccount) -> Result<Account, StoreError>;

    async fn update_account_type(
        &mut self,
        id: i64,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError>;

    /// Write a new balance, refreshing `updated_at`. Returns the updated
    /// account.
    async fn update_balance(&mut self, id: i64, balance: Balance)
        -> Result<Account, StoreError>;

    async fn insert_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, StoreError>;

    /// Delete an account and its transactions as one unit.
    async fn delete_account_cascade(&mut self, id: i64) -> Result<(), StoreError>;

    /// Delete a user, their accounts, and all dependent transactions.
    async fn delete_user_cascade(&mut self, user_id: i64) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
    async fn rollback(self) -> Result<(), StoreError>;
}
