//! Postgres ledger store
//!
//! sqlx-backed adapter. Units of work map to database transactions; account
//! rows are locked with `SELECT ... FOR UPDATE` before any balance check so
//! concurrent debits serialize at the store layer, which holds across
//! multiple process instances.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};

use async_trait::async_trait;

use crate::domain::{Account, AccountType, Balance, Transaction, TransactionType, User};
use crate::validation::TransactionFilter;

use super::{
    LedgerStore, LedgerTx, NewAccount, NewTransaction, NewUser, StoreError, UserChanges,
};

/// Schema DDL, applied at startup. Statements are idempotent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username VARCHAR(50) NOT NULL UNIQUE,
        email VARCHAR(120) NOT NULL UNIQUE,
        credential VARCHAR(128) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users(id),
        account_type VARCHAR(16) NOT NULL,
        account_number VARCHAR(20) NOT NULL UNIQUE,
        balance NUMERIC(12, 2) NOT NULL DEFAULT 0.00 CHECK (balance >= 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id BIGSERIAL PRIMARY KEY,
        from_account_id BIGINT REFERENCES accounts(id),
        to_account_id BIGINT REFERENCES accounts(id),
        amount NUMERIC(12, 2) NOT NULL CHECK (amount > 0),
        kind VARCHAR(16) NOT NULL,
        description VARCHAR(255),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_accounts_user_id ON accounts (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_from_account ON transactions (from_account_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_to_account ON transactions (to_account_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_created_at ON transactions (created_at)",
];

type UserRow = (i64, String, String, String, DateTime<Utc>, DateTime<Utc>);
type AccountRow = (i64, i64, String, String, Decimal, DateTime<Utc>, DateTime<Utc>);
type TransactionRow = (
    i64,
    Option<i64>,
    Option<i64>,
    Decimal,
    String,
    Option<String>,
    DateTime<Utc>,
);

const USER_COLUMNS: &str = "id, username, email, credential, created_at, updated_at";
const ACCOUNT_COLUMNS: &str =
    "id, user_id, account_type, account_number, balance, created_at, updated_at";
const TRANSACTION_COLUMNS: &str =
    "id, from_account_id, to_account_id, amount, kind, description, created_at";

fn user_from_row(row: UserRow) -> User {
    let (id, username, email, credential, created_at, updated_at) = row;
    User {
        id,
        username,
        email,
        credential,
        created_at,
        updated_at,
    }
}

fn account_from_row(row: AccountRow) -> Result<Account, StoreError> {
    let (id, user_id, account_type, account_number, balance, created_at, updated_at) = row;
    Ok(Account {
        id,
        user_id,
        account_type: account_type
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("account {id}: type {account_type:?}")))?,
        account_number,
        balance: Balance::new(balance)
            .map_err(|e| StoreError::Corrupt(format!("account {id}: balance {e}")))?,
        created_at,
        updated_at,
    })
}

fn transaction_from_row(row: TransactionRow) -> Result<Transaction, StoreError> {
    let (id, from_account_id, to_account_id, amount, kind, description, created_at) = row;
    Ok(Transaction {
        id,
        from_account_id,
        to_account_id,
        amount,
        kind: kind
            .parse::<TransactionType>()
            .map_err(|_| StoreError::Corrupt(format!("transaction {id}: kind {kind:?}")))?,
        description,
        created_at,
    })
}

/// Map a unique violation on the named field, passing other errors through.
fn map_unique(err: sqlx::Error, field: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(field),
        _ => StoreError::Database(err),
    }
}

/// Users carry two unique columns; the violated constraint names the field.
fn map_user_unique(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return match db.constraint() {
                Some(c) if c.contains("email") => StoreError::Duplicate("email"),
                _ => StoreError::Duplicate("username"),
            };
        }
    }
    StoreError::Database(err)
}

/// Postgres-backed [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema. Safe to run on every startup.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("database schema verified");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgLedgerTx { tx })
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(user_from_row))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(user_from_row))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let row: UserRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (username, email, credential)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.credential)
        .fetch_one(&self.pool)
        .await
        .map_err(map_user_unique)?;
        Ok(user_from_row(row))
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            r#"
            UPDATE users
            SET email = COALESCE($2, email),
                credential = COALESCE($3, credential),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.email)
        .bind(changes.credential)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_user_unique)?;
        Ok(row.map(user_from_row))
    }

    async fn get_account(&self, id: i64) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(account_from_row).transpose()
    }

    async fn get_owned_account(
        &self,
        user_id: i64,
        account_id: i64,
    ) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND user_id = $2"
        ))
        .bind(account_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(account_from_row).transpose()
    }

    async fn list_accounts_by_user(&self, user_id: i64) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1 ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(account_from_row).collect()
    }

    async fn find_account_by_number(&self, number: &str) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_number = $1"
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        row.map(account_from_row).transpose()
    }

    async fn list_transactions(
        &self,
        account_ids: &[i64],
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE (from_account_id = ANY($1) OR to_account_id = ANY($1))
              AND ($2::BIGINT IS NULL OR from_account_id = $2 OR to_account_id = $2)
              AND ($3::TIMESTAMPTZ IS NULL OR created_at >= $3)
              AND ($4::TIMESTAMPTZ IS NULL OR created_at <= $4)
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(account_ids)
        .bind(filter.account_id)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(transaction_from_row).collect()
    }

    async fn get_transaction_for_accounts(
        &self,
        transaction_id: i64,
        account_ids: &[i64],
    ) -> Result<Option<Transaction>, StoreError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE id = $1
              AND (from_account_id = ANY($2) OR to_account_id = ANY($2))
            "#
        ))
        .bind(transaction_id)
        .bind(account_ids)
        .fetch_optional(&self.pool)
        .await?;
        row.map(transaction_from_row).transpose()
    }
}

/// A database transaction holding row locks until commit or rollback.
pub struct PgLedgerTx {
    tx: SqlxTransaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_account(&mut self, id: i64) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(account_from_row).transpose()
    }

    async fn lock_owned_account(
        &mut self,
        user_id: i64,
        account_id: i64,
    ) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND user_id = $2 FOR UPDATE"
        ))
        .bind(account_id)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(account_from_row).transpose()
    }

    async fn get_user(&mut self, id: i64) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(row.map(user_from_row))
    }

    async fn insert_account(&mut self, account: NewAccount) -> Result<Account, StoreError> {
        let row: AccountRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO accounts (user_id, account_type, account_number, balance)
            VALUES ($1, $2, $3, 0.00)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(account.user_id)
        .bind(account.account_type.as_str())
        .bind(&account.account_number)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_unique(e, "account_number"))?;
        account_from_row(row)
    }

    async fn update_account_type(
        &mut self,
        id: i64,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            r#"
            UPDATE accounts
            SET account_type = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(account_type.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(account_from_row).transpose()
    }

    async fn update_balance(
        &mut self,
        id: i64,
        balance: Balance,
    ) -> Result<Account, StoreError> {
        let row: AccountRow = sqlx::query_as(&format!(
            r#"
            UPDATE accounts
            SET balance = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(balance.value())
        .fetch_one(&mut *self.tx)
        .await?;
        account_from_row(row)
    }

    async fn insert_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        let row: TransactionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO transactions (from_account_id, to_account_id, amount, kind, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(transaction.from_account_id)
        .bind(transaction.to_account_id)
        .bind(transaction.amount.value())
        .bind(transaction.kind.as_str())
        .bind(&transaction.description)
        .fetch_one(&mut *self.tx)
        .await?;
        transaction_from_row(row)
    }

    async fn delete_account_cascade(&mut self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM transactions WHERE from_account_id = $1 OR to_account_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_user_cascade(&mut self, user_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM transactions
            WHERE from_account_id IN (SELECT id FROM accounts WHERE user_id = $1)
               OR to_account_id IN (SELECT id FROM accounts WHERE user_id = $1)
            "#,
        )
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;
        sqlx::query("DELETE FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
