//! In-memory ledger store
//!
//! Table maps guarded by an async mutex. A unit of work takes the mutex for
//! its whole lifetime and mutates a snapshot that replaces the shared state
//! on commit, so uncommitted work vanishes on drop and concurrent units of
//! work observe the same serialized ordering the Postgres adapter enforces
//! with row locks. Backs tests and ephemeral runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{Account, AccountType, Balance, Transaction, User};
use crate::validation::TransactionFilter;

use super::{
    LedgerStore, LedgerTx, NewAccount, NewTransaction, NewUser, StoreError, UserChanges,
};

#[derive(Debug, Clone)]
struct Tables {
    users: BTreeMap<i64, User>,
    accounts: BTreeMap<i64, Account>,
    transactions: BTreeMap<i64, Transaction>,
    next_user_id: i64,
    next_account_id: i64,
    next_transaction_id: i64,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            accounts: BTreeMap::new(),
            transactions: BTreeMap::new(),
            next_user_id: 1,
            next_account_id: 1,
            next_transaction_id: 1,
        }
    }
}

impl Tables {
    fn matches(
        transaction: &Transaction,
        account_ids: &[i64],
        filter: &TransactionFilter,
    ) -> bool {
        let touches_set = transaction
            .from_account_id
            .is_some_and(|id| account_ids.contains(&id))
            || transaction
                .to_account_id
                .is_some_and(|id| account_ids.contains(&id));
        if !touches_set {
            return false;
        }
        if let Some(account_id) = filter.account_id {
            if !transaction.involves(account_id) {
                return false;
            }
        }
        if let Some(start) = filter.start_date {
            if transaction.created_at < start {
                return false;
            }
        }
        if let Some(end) = filter.end_date {
            if transaction.created_at > end {
                return false;
            }
        }
        true
    }
}

/// In-memory [`LedgerStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let work = guard.clone();
        Ok(MemoryLedgerTx { guard, work })
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate("username"));
        }
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("email"));
        }
        let id = tables.next_user_id;
        tables.next_user_id += 1;
        let now = Utc::now();
        let user = User {
            id,
            username: user.username,
            email: user.email,
            credential: user.credential,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(ref email) = changes.email {
            if tables
                .users
                .values()
                .any(|u| u.id != id && u.email == *email)
            {
                return Err(StoreError::Duplicate("email"));
            }
        }
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(credential) = changes.credential {
            user.credential = credential;
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn get_account(&self, id: i64) -> Result<Option<Account>, StoreError> {
        Ok(self.tables.lock().await.accounts.get(&id).cloned())
    }

    async fn get_owned_account(
        &self,
        user_id: i64,
        account_id: i64,
    ) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .get(&account_id)
            .filter(|a| a.user_id == user_id)
            .cloned())
    }

    async fn list_accounts_by_user(&self, user_id: i64) -> Result<Vec<Account>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_account_by_number(&self, number: &str) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .find(|a| a.account_number == number)
            .cloned())
    }

    async fn list_transactions(
        &self,
        account_ids: &[i64],
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let tables = self.tables.lock().await;
        let mut result: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| Tables::matches(t, account_ids, filter))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn get_transaction_for_accounts(
        &self,
        transaction_id: i64,
        account_ids: &[i64],
    ) -> Result<Option<Transaction>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .transactions
            .get(&transaction_id)
            .filter(|t| {
                t.from_account_id.is_some_and(|id| account_ids.contains(&id))
                    || t.to_account_id.is_some_and(|id| account_ids.contains(&id))
            })
            .cloned())
    }
}

/// A unit of work over the in-memory tables. Holds the store mutex, so
/// concurrent units of work serialize exactly like row-locked database
/// transactions on the accounts they touch.
pub struct MemoryLedgerTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn lock_account(&mut self, id: i64) -> Result<Option<Account>, StoreError> {
        Ok(self.work.accounts.get(&id).cloned())
    }

    async fn lock_owned_account(
        &mut self,
        user_id: i64,
        account_id: i64,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self
            .work
            .accounts
            .get(&account_id)
            .filter(|a| a.user_id == user_id)
            .cloned())
    }

    async fn get_user(&mut self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.work.users.get(&id).cloned())
    }

    async fn insert_account(&mut self, account: NewAccount) -> Result<Account, StoreError> {
        if self
            .work
            .accounts
            .values()
            .any(|a| a.account_number == account.account_number)
        {
            return Err(StoreError::Duplicate("account_number"));
        }
        let id = self.work.next_account_id;
        self.work.next_account_id += 1;
        let now = Utc::now();
        let account = Account {
            id,
            user_id: account.user_id,
            account_type: account.account_type,
            account_number: account.account_number,
            balance: Balance::zero(),
            created_at: now,
            updated_at: now,
        };
        self.work.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn update_account_type(
        &mut self,
        id: i64,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError> {
        let Some(account) = self.work.accounts.get_mut(&id) else {
            return Ok(None);
        };
        account.account_type = account_type;
        account.updated_at = Utc::now();
        Ok(Some(account.clone()))
    }

    async fn update_balance(
        &mut self,
        id: i64,
        balance: Balance,
    ) -> Result<Account, StoreError> {
        let account = self
            .work
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("account {id} vanished mid-transaction")))?;
        account.balance = balance;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn insert_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        let id = self.work.next_transaction_id;
        self.work.next_transaction_id += 1;
        let transaction = Transaction {
            id,
            from_account_id: transaction.from_account_id,
            to_account_id: transaction.to_account_id,
            amount: transaction.amount.value(),
            kind: transaction.kind,
            description: transaction.description,
            created_at: Utc::now(),
        };
        self.work.transactions.insert(id, transaction.clone());
        Ok(transaction)
    }

    async fn delete_account_cascade(&mut self, id: i64) -> Result<(), StoreError> {
        self.work.transactions.retain(|_, t| !t.involves(id));
        self.work.accounts.remove(&id);
        Ok(())
    }

    async fn delete_user_cascade(&mut self, user_id: i64) -> Result<(), StoreError> {
        let owned: Vec<i64> = self
            .work
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .map(|a| a.id)
            .collect();
        self.work
            .transactions
            .retain(|_, t| !owned.iter().any(|id| t.involves(*id)));
        self.work.accounts.retain(|_, a| a.user_id != user_id);
        self.work.users.remove(&user_id);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        *self.guard = self.work;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        // Dropping the snapshot discards all staged writes.
        Ok(())
    }
}
