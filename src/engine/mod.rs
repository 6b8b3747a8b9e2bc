//! Transaction engine
//!
//! Applies validated commands against the ledger store. Every operation runs
//! inside a single unit of work: the balance mutation(s) and the transaction
//! row commit together or not at all. Returning early with `?` drops the
//! unit of work, which rolls it back, so no partial application is ever
//! observable outside the engine.
//!
//! Concurrency: accounts are locked (row locks in the Postgres adapter)
//! before the balance check and held until commit, so two concurrent debits
//! cannot both pass the check on a stale read. Transfers lock their two
//! accounts in ascending id order to avoid deadlock.

use rand::Rng;

use crate::domain::{Account, DomainError, Transaction, TransactionType};
use crate::error::{AppError, AppResult};
use crate::store::{LedgerStore, LedgerTx, NewAccount, NewTransaction};
use crate::validation::{AccountCommand, DepositCommand, TransferCommand, WithdrawCommand};

/// Length of a system-generated account number.
const ACCOUNT_NUMBER_DIGITS: usize = 12;

/// Draw a random 12-digit account number. Leading zeros are allowed.
fn generate_account_number() -> String {
    let mut rng = rand::thread_rng();
    (0..ACCOUNT_NUMBER_DIGITS)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}

/// The transaction-processing core.
#[derive(Debug, Clone)]
pub struct TransactionEngine<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> TransactionEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Credit a caller-owned account.
    pub async fn deposit(
        &self,
        user_id: i64,
        account_id: i64,
        command: DepositCommand,
    ) -> AppResult<(Transaction, Account)> {
        let mut tx = self.store.begin().await?;

        let account = tx
            .lock_owned_account(user_id, account_id)
            .await?
            .ok_or(DomainError::AccountNotFound)?;

        let balance = account
            .balance
            .credit(&command.amount)
            .map_err(|e| AppError::Internal(format!("credit overflow: {e}")))?;

        let account = tx.update_balance(account.id, balance).await?;
        let transaction = tx
            .insert_transaction(NewTransaction {
                from_account_id: None,
                to_account_id: Some(account.id),
                amount: command.amount,
                kind: TransactionType::Deposit,
                description: command.description,
            })
            .await?;
        tx.commit().await?;

        tracing::info!(
            account_id = account.id,
            amount = %command.amount,
            "deposit committed"
        );
        Ok((transaction, account))
    }

    /// Debit a caller-owned account. The funds check happens under the row
    /// lock, before any mutation.
    pub async fn withdraw(
        &self,
        user_id: i64,
        account_id: i64,
        command: WithdrawCommand,
    ) -> AppResult<(Transaction, Account)> {
        let mut tx = self.store.begin().await?;

        let account = tx
            .lock_owned_account(user_id, account_id)
            .await?
            .ok_or(DomainError::AccountNotFound)?;

        if !account.balance.is_sufficient_for(&command.amount) {
            return Err(DomainError::insufficient_funds(
                command.amount.value(),
                account.balance.value(),
            )
            .into());
        }

        let balance = account
            .balance
            .debit(&command.amount)
            .map_err(|e| AppError::Internal(format!("debit after funds check: {e}")))?;

        let account = tx.update_balance(account.id, balance).await?;
        let transaction = tx
            .insert_transaction(NewTransaction {
                from_account_id: Some(account.id),
                to_account_id: None,
                amount: command.amount,
                kind: TransactionType::Withdrawal,
                description: command.description,
            })
            .await?;
        tx.commit().await?;

        tracing::info!(
            account_id = account.id,
            amount = %command.amount,
            "withdrawal committed"
        );
        Ok((transaction, account))
    }

    /// Move funds from a caller-owned account to any existing account.
    /// Destinations are deliberately not restricted to the caller's own
    /// accounts; deposits and withdrawals are.
    pub async fn transfer(
        &self,
        user_id: i64,
        account_id: i64,
        command: TransferCommand,
    ) -> AppResult<(Transaction, Account, Account)> {
        if account_id == command.to_account_id {
            return Err(DomainError::SelfTransfer.into());
        }

        let mut tx = self.store.begin().await?;

        // Ascending-id lock order keeps two opposing transfers from
        // deadlocking on each other's rows.
        let (from, to) = if account_id < command.to_account_id {
            let from = tx
                .lock_owned_account(user_id, account_id)
                .await?
                .ok_or(DomainError::AccountNotFound)?;
            let to = tx
                .lock_account(command.to_account_id)
                .await?
                .ok_or(DomainError::AccountNotFound)?;
            (from, to)
        } else {
            let to = tx
                .lock_account(command.to_account_id)
                .await?
                .ok_or(DomainError::AccountNotFound)?;
            let from = tx
                .lock_owned_account(user_id, account_id)
                .await?
                .ok_or(DomainError::AccountNotFound)?;
            (from, to)
        };

        if !from.balance.is_sufficient_for(&command.amount) {
            return Err(DomainError::insufficient_funds(
                command.amount.value(),
                from.balance.value(),
            )
            .into());
        }

        let from_balance = from
            .balance
            .debit(&command.amount)
            .map_err(|e| AppError::Internal(format!("debit after funds check: {e}")))?;
        let to_balance = to
            .balance
            .credit(&command.amount)
            .map_err(|e| AppError::Internal(format!("credit overflow: {e}")))?;

        let from = tx.update_balance(from.id, from_balance).await?;
        let to = tx.update_balance(to.id, to_balance).await?;
        let transaction = tx
            .insert_transaction(NewTransaction {
                from_account_id: Some(from.id),
                to_account_id: Some(to.id),
                amount: command.amount,
                kind: TransactionType::Transfer,
                description: command.description,
            })
            .await?;
        tx.commit().await?;

        tracing::info!(
            from_account_id = from.id,
            to_account_id = to.id,
            amount = %command.amount,
            "transfer committed"
        );
        Ok((transaction, from, to))
    }

    /// Open a new account for the caller with a fresh unique number and a
    /// zero balance.
    pub async fn create_account(
        &self,
        user_id: i64,
        command: AccountCommand,
    ) -> AppResult<Account> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        // Collisions are vanishingly rare but the store is always consulted;
        // uniqueness is never assumed. A racing duplicate insert still
        // surfaces as a conflict through the unique constraint.
        let account_number = loop {
            let candidate = generate_account_number();
            if self
                .store
                .find_account_by_number(&candidate)
                .await?
                .is_none()
            {
                break candidate;
            }
        };

        let mut tx = self.store.begin().await?;
        let account = tx
            .insert_account(NewAccount {
                user_id: user.id,
                account_type: command.account_type,
                account_number,
            })
            .await?;
        tx.commit().await?;

        tracing::info!(account_id = account.id, user_id = user.id, "account created");
        Ok(account)
    }

    /// Change the type of a caller-owned account. No balance side effects.
    pub async fn update_account(
        &self,
        user_id: i64,
        account_id: i64,
        command: AccountCommand,
    ) -> AppResult<Account> {
        let mut tx = self.store.begin().await?;

        let account = tx
            .lock_owned_account(user_id, account_id)
            .await?
            .ok_or(DomainError::AccountNotFound)?;
        let account = tx
            .update_account_type(account.id, command.account_type)
            .await?
            .ok_or(DomainError::AccountNotFound)?;
        tx.commit().await?;

        Ok(account)
    }

    /// Delete a caller-owned account and its transactions as one unit.
    pub async fn delete_account(&self, user_id: i64, account_id: i64) -> AppResult<()> {
        let mut tx = self.store.begin().await?;

        let account = tx
            .lock_owned_account(user_id, account_id)
            .await?
            .ok_or(DomainError::AccountNotFound)?;
        tx.delete_account_cascade(account.id).await?;
        tx.commit().await?;

        tracing::info!(account_id = account.id, "account deleted");
        Ok(())
    }

    /// Delete a user with their accounts and transactions as one unit.
    pub async fn delete_user(&self, user_id: i64) -> AppResult<()> {
        let mut tx = self.store.begin().await?;

        tx.get_user(user_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;
        tx.delete_user_cascade(user_id).await?;
        tx.commit().await?;

        tracing::info!(user_id, "user deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountType, Amount};
    use crate::store::{MemoryLedgerStore, NewUser};
    use crate::validation::TransactionFilter;
    use rust_decimal_macros::dec;

    async fn engine_with_user() -> (TransactionEngine<MemoryLedgerStore>, i64) {
        let store = MemoryLedgerStore::new();
        let user = store
            .create_user(NewUser {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                credential: "opaque".to_string(),
            })
            .await
            .unwrap();
        (TransactionEngine::new(store), user.id)
    }

    fn amount(value: rust_decimal::Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    fn deposit_cmd(value: rust_decimal::Decimal) -> DepositCommand {
        DepositCommand {
            amount: amount(value),
            description: None,
        }
    }

    fn withdraw_cmd(value: rust_decimal::Decimal) -> WithdrawCommand {
        WithdrawCommand {
            amount: amount(value),
            description: None,
        }
    }

    #[test]
    fn test_account_number_shape() {
        for _ in 0..32 {
            let number = generate_account_number();
            assert_eq!(number.len(), 12);
            assert!(number.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_create_account_starts_at_zero() {
        let (engine, user_id) = engine_with_user().await;
        let account = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();

        assert_eq!(account.user_id, user_id);
        assert_eq!(account.balance.value(), dec!(0.00));
        assert_eq!(account.account_number.len(), 12);
    }

    #[tokio::test]
    async fn test_create_account_unknown_user() {
        let (engine, _) = engine_with_user().await;
        let result = engine
            .create_account(
                999,
                AccountCommand {
                    account_type: AccountType::Savings,
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::UserNotFound))
        ));
    }

    #[tokio::test]
    async fn test_deposit_then_withdraw_exact_round_trip() {
        let (engine, user_id) = engine_with_user().await;
        let account = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();

        let (_, account_after) = engine
            .deposit(user_id, account.id, deposit_cmd(dec!(100.00)))
            .await
            .unwrap();
        assert_eq!(account_after.balance.value(), dec!(100.00));

        let (_, account_after) = engine
            .withdraw(user_id, account.id, withdraw_cmd(dec!(100.00)))
            .await
            .unwrap();
        assert_eq!(account_after.balance.value(), dec!(0.00));
    }

    #[tokio::test]
    async fn test_withdraw_insufficient_funds_leaves_balance_untouched() {
        let (engine, user_id) = engine_with_user().await;
        let account = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();
        engine
            .deposit(user_id, account.id, deposit_cmd(dec!(50.00)))
            .await
            .unwrap();

        let result = engine
            .withdraw(user_id, account.id, withdraw_cmd(dec!(75.00)))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::InsufficientFunds { .. }))
        ));

        let stored = engine
            .store
            .get_account(account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.balance.value(), dec!(50.00));

        // The rejected withdrawal left no transaction row either.
        let history = engine
            .store
            .list_transactions(&[account.id], &TransactionFilter::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_deposit_to_foreign_account_not_found() {
        let (engine, user_id) = engine_with_user().await;
        let other = engine
            .store
            .create_user(NewUser {
                username: "bob".to_string(),
                email: "bob@example.com".to_string(),
                credential: "opaque".to_string(),
            })
            .await
            .unwrap();
        let foreign = engine
            .create_account(
                other.id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();

        let result = engine
            .deposit(user_id, foreign.id, deposit_cmd(dec!(10.00)))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::AccountNotFound))
        ));
    }

    #[tokio::test]
    async fn test_transfer_moves_funds_and_writes_one_row() {
        let (engine, user_id) = engine_with_user().await;
        let a = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();
        let b = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Savings,
                },
            )
            .await
            .unwrap();

        engine
            .deposit(user_id, a.id, deposit_cmd(dec!(20.00)))
            .await
            .unwrap();
        let (transaction, from, to) = engine
            .transfer(
                user_id,
                a.id,
                TransferCommand {
                    amount: amount(dec!(15.00)),
                    to_account_id: b.id,
                    description: Some("rent".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(from.balance.value(), dec!(5.00));
        assert_eq!(to.balance.value(), dec!(15.00));
        assert_eq!(transaction.from_account_id, Some(a.id));
        assert_eq!(transaction.to_account_id, Some(b.id));
        assert_eq!(transaction.kind, TransactionType::Transfer);

        // Two rows for A: the deposit and the transfer.
        let history = engine
            .store
            .list_transactions(&[a.id], &TransactionFilter::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, TransactionType::Transfer);
        assert_eq!(history[1].kind, TransactionType::Deposit);
    }

    #[tokio::test]
    async fn test_transfer_to_any_user_allowed() {
        let (engine, user_id) = engine_with_user().await;
        let other = engine
            .store
            .create_user(NewUser {
                username: "bob".to_string(),
                email: "bob@example.com".to_string(),
                credential: "opaque".to_string(),
            })
            .await
            .unwrap();
        let mine = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();
        let theirs = engine
            .create_account(
                other.id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();

        engine
            .deposit(user_id, mine.id, deposit_cmd(dec!(10.00)))
            .await
            .unwrap();
        let (_, from, to) = engine
            .transfer(
                user_id,
                mine.id,
                TransferCommand {
                    amount: amount(dec!(10.00)),
                    to_account_id: theirs.id,
                    description: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(from.balance.value(), dec!(0.00));
        assert_eq!(to.balance.value(), dec!(10.00));
        assert_eq!(to.user_id, other.id);
    }

    #[tokio::test]
    async fn test_self_transfer_rejected_regardless_of_balance() {
        let (engine, user_id) = engine_with_user().await;
        let account = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();
        engine
            .deposit(user_id, account.id, deposit_cmd(dec!(100.00)))
            .await
            .unwrap();

        let result = engine
            .transfer(
                user_id,
                account.id,
                TransferCommand {
                    amount: amount(dec!(1.00)),
                    to_account_id: account.id,
                    description: None,
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::SelfTransfer))
        ));
    }

    #[tokio::test]
    async fn test_transfer_to_missing_account_leaves_no_trace() {
        let (engine, user_id) = engine_with_user().await;
        let account = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();
        engine
            .deposit(user_id, account.id, deposit_cmd(dec!(50.00)))
            .await
            .unwrap();

        let result = engine
            .transfer(
                user_id,
                account.id,
                TransferCommand {
                    amount: amount(dec!(10.00)),
                    to_account_id: 9999,
                    description: None,
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::AccountNotFound))
        ));

        let stored = engine
            .store
            .get_account(account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.balance.value(), dec!(50.00));
        let history = engine
            .store
            .list_transactions(&[account.id], &TransactionFilter::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_transfer_insufficient_funds() {
        let (engine, user_id) = engine_with_user().await;
        let a = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();
        let b = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Savings,
                },
            )
            .await
            .unwrap();
        engine
            .deposit(user_id, a.id, deposit_cmd(dec!(5.00)))
            .await
            .unwrap();

        let result = engine
            .transfer(
                user_id,
                a.id,
                TransferCommand {
                    amount: amount(dec!(5.01)),
                    to_account_id: b.id,
                    description: None,
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::InsufficientFunds { .. }))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_withdrawals_cannot_double_spend() {
        let (engine, user_id) = engine_with_user().await;
        let account = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();
        engine
            .deposit(user_id, account.id, deposit_cmd(dec!(100.00)))
            .await
            .unwrap();

        // Two withdrawals of 75.00 against 100.00: at most one may pass the
        // funds check, however they interleave.
        let first = {
            let engine = engine.clone();
            let id = account.id;
            tokio::spawn(async move { engine.withdraw(user_id, id, withdraw_cmd(dec!(75.00))).await })
        };
        let second = {
            let engine = engine.clone();
            let id = account.id;
            tokio::spawn(async move { engine.withdraw(user_id, id, withdraw_cmd(dec!(75.00))).await })
        };

        let outcomes = [first.await.unwrap(), second.await.unwrap()];
        let successes = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(outcomes.iter().any(|r| matches!(
            r,
            Err(AppError::Domain(DomainError::InsufficientFunds { .. }))
        )));

        let stored = engine
            .store
            .get_account(account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.balance.value(), dec!(25.00));
    }

    #[tokio::test]
    async fn test_balance_always_equals_transaction_sum() {
        let (engine, user_id) = engine_with_user().await;
        let a = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();
        let b = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Savings,
                },
            )
            .await
            .unwrap();

        engine
            .deposit(user_id, a.id, deposit_cmd(dec!(40.00)))
            .await
            .unwrap();
        engine
            .deposit(user_id, a.id, deposit_cmd(dec!(2.50)))
            .await
            .unwrap();
        engine
            .withdraw(user_id, a.id, withdraw_cmd(dec!(0.75)))
            .await
            .unwrap();
        engine
            .transfer(
                user_id,
                a.id,
                TransferCommand {
                    amount: amount(dec!(11.25)),
                    to_account_id: b.id,
                    description: None,
                },
            )
            .await
            .unwrap();

        for id in [a.id, b.id] {
            let account = engine.store.get_account(id).await.unwrap().unwrap();
            let history = engine
                .store
                .list_transactions(&[id], &TransactionFilter::default())
                .await
                .unwrap();
            let sum: rust_decimal::Decimal = history
                .iter()
                .map(|t| {
                    if t.to_account_id == Some(id) {
                        t.amount
                    } else {
                        -t.amount
                    }
                })
                .sum();
            assert_eq!(account.balance.value(), sum);
        }
    }

    #[tokio::test]
    async fn test_update_account_type_keeps_balance() {
        let (engine, user_id) = engine_with_user().await;
        let account = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();
        engine
            .deposit(user_id, account.id, deposit_cmd(dec!(30.00)))
            .await
            .unwrap();

        let updated = engine
            .update_account(
                user_id,
                account.id,
                AccountCommand {
                    account_type: AccountType::Savings,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.account_type, AccountType::Savings);
        assert_eq!(updated.balance.value(), dec!(30.00));
    }

    #[tokio::test]
    async fn test_delete_account_cascades_transactions() {
        let (engine, user_id) = engine_with_user().await;
        let account = engine
            .create_account(
                user_id,
                AccountCommand {
                    account_type: AccountType::Checking,
                },
            )
            .await
            .unwrap();
        engine
            .deposit(user_id, account.id, deposit_cmd(dec!(10.00)))
            .await
            .unwrap();

        engine.delete_account(user_id, account.id).await.unwrap();

        assert!(engine
            .store
            .get_account(account.id)
            .await
            .unwrap()
            .is_none());
        assert!(engine
            .store
            .list_transactions(&[account.id], &TransactionFilter::default())
            .await
            .unwrap()
            .is_empty());
    }
}
