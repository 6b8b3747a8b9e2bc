//! API routes
//!
//! HTTP endpoint definitions. Handlers stay thin: extract the caller, run
//! the validation layer, dispatch to the engine or query layer, and wrap the
//! outcome in the response envelope.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::domain::{Account, AccountType, DomainError, Transaction, TransactionType, User};
use crate::engine::TransactionEngine;
use crate::error::{AppError, AppResult};
use crate::query::TransactionQuery;
use crate::store::{LedgerStore, NewUser, UserChanges};
use crate::validation::{
    parse_id, AccountBody, AccountCommand, DepositCommand, FilterQuery, ProfileUpdateBody,
    ProfileUpdateCommand, SignupBody, SignupCommand, TransactionBody, TransactionFilter,
    TransferCommand, ValidationError, WithdrawCommand,
};

use super::middleware::{auth_middleware, AuthenticatedUser};
use super::response::{success, success_empty, Envelope};

// =========================================================================
// Response types
// =========================================================================

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: i64,
    pub user_id: i64,
    pub account_type: AccountType,
    pub account_number: String,
    /// Rendered as a plain decimal string, e.g. `"100.50"`.
    pub balance: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            user_id: account.user_id,
            account_type: account.account_type,
            account_number: account.account_number,
            balance: account.balance.value().to_string(),
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: i64,
    pub from_account_id: Option<i64>,
    pub to_account_id: Option<i64>,
    pub amount: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionResponse {
    fn from(transaction: Transaction) -> Self {
        Self {
            id: transaction.id,
            from_account_id: transaction.from_account_id,
            to_account_id: transaction.to_account_id,
            amount: transaction.amount.to_string(),
            kind: transaction.kind,
            description: transaction.description,
            created_at: transaction.created_at,
        }
    }
}

// =========================================================================
// Router
// =========================================================================

/// The `/api` router. Signup is public; everything else requires the
/// authenticated-caller header.
pub fn create_router<S: LedgerStore>() -> Router<S> {
    let public = Router::new().route("/users", post(signup::<S>));

    let protected = Router::new()
        .route(
            "/users/me",
            get(get_profile::<S>)
                .put(update_profile::<S>)
                .delete(delete_profile::<S>),
        )
        .route(
            "/accounts",
            get(list_accounts::<S>).post(create_account::<S>),
        )
        .route(
            "/accounts/:account_id",
            get(get_account::<S>)
                .put(update_account::<S>)
                .delete(delete_account::<S>),
        )
        .route(
            "/transactions",
            get(list_transactions::<S>).post(create_transaction::<S>),
        )
        .route("/transactions/:transaction_id", get(get_transaction::<S>))
        .route_layer(axum_middleware::from_fn(auth_middleware));

    public.merge(protected)
}

// =========================================================================
// POST /api/users
// =========================================================================

/// Sign up a new user. The credential passes through opaquely.
async fn signup<S: LedgerStore>(
    State(store): State<S>,
    Json(body): Json<SignupBody>,
) -> AppResult<(StatusCode, Json<Envelope<UserResponse>>)> {
    let command = SignupCommand::parse(&body)?;

    if store
        .get_user_by_username(&command.username)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("username"));
    }
    if store.get_user_by_email(&command.email).await?.is_some() {
        return Err(AppError::Conflict("email"));
    }

    let user = store
        .create_user(NewUser {
            username: command.username,
            email: command.email,
            credential: command.credential,
        })
        .await?;

    Ok(success(
        StatusCode::CREATED,
        "User created successfully",
        UserResponse::from(user),
    ))
}

// =========================================================================
// GET / PUT / DELETE /api/users/me
// =========================================================================

async fn get_profile<S: LedgerStore>(
    State(store): State<S>,
    Extension(caller): Extension<AuthenticatedUser>,
) -> AppResult<(StatusCode, Json<Envelope<UserResponse>>)> {
    let user = store
        .get_user(caller.user_id)
        .await?
        .ok_or(DomainError::UserNotFound)?;

    Ok(success(
        StatusCode::OK,
        "User profile retrieved successfully",
        UserResponse::from(user),
    ))
}

async fn update_profile<S: LedgerStore>(
    State(store): State<S>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(body): Json<ProfileUpdateBody>,
) -> AppResult<(StatusCode, Json<Envelope<UserResponse>>)> {
    let command = ProfileUpdateCommand::parse(&body)?;

    let user = store
        .get_user(caller.user_id)
        .await?
        .ok_or(DomainError::UserNotFound)?;

    if let Some(ref email) = command.email {
        if *email != user.email && store.get_user_by_email(email).await?.is_some() {
            return Err(AppError::Conflict("email"));
        }
    }

    let user = store
        .update_user(
            user.id,
            UserChanges {
                email: command.email,
                credential: command.credential,
            },
        )
        .await?
        .ok_or(DomainError::UserNotFound)?;

    Ok(success(
        StatusCode::OK,
        "User updated successfully",
        UserResponse::from(user),
    ))
}

async fn delete_profile<S: LedgerStore>(
    State(store): State<S>,
    Extension(caller): Extension<AuthenticatedUser>,
) -> AppResult<(StatusCode, Json<Envelope<()>>)> {
    let engine = TransactionEngine::new(store);
    engine.delete_user(caller.user_id).await?;

    Ok(success_empty(StatusCode::OK, "User deleted successfully"))
}

// =========================================================================
// GET / POST /api/accounts
// =========================================================================

async fn list_accounts<S: LedgerStore>(
    State(store): State<S>,
    Extension(caller): Extension<AuthenticatedUser>,
) -> AppResult<(StatusCode, Json<Envelope<Vec<AccountResponse>>>)> {
    let accounts = store.list_accounts_by_user(caller.user_id).await?;

    Ok(success(
        StatusCode::OK,
        "Accounts retrieved successfully",
        accounts.into_iter().map(AccountResponse::from).collect(),
    ))
}

async fn create_account<S: LedgerStore>(
    State(store): State<S>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(body): Json<AccountBody>,
) -> AppResult<(StatusCode, Json<Envelope<AccountResponse>>)> {
    let command = AccountCommand::parse(&body)?;

    let engine = TransactionEngine::new(store);
    let account = engine.create_account(caller.user_id, command).await?;

    Ok(success(
        StatusCode::CREATED,
        "Account created successfully",
        AccountResponse::from(account),
    ))
}

// =========================================================================
// GET / PUT / DELETE /api/accounts/:account_id
// =========================================================================

async fn get_account<S: LedgerStore>(
    State(store): State<S>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(account_id): Path<i64>,
) -> AppResult<(StatusCode, Json<Envelope<AccountResponse>>)> {
    let account = store
        .get_owned_account(caller.user_id, account_id)
        .await?
        .ok_or(DomainError::AccountNotFound)?;

    Ok(success(
        StatusCode::OK,
        "Account retrieved successfully",
        AccountResponse::from(account),
    ))
}

async fn update_account<S: LedgerStore>(
    State(store): State<S>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(account_id): Path<i64>,
    Json(body): Json<AccountBody>,
) -> AppResult<(StatusCode, Json<Envelope<AccountResponse>>)> {
    let command = AccountCommand::parse(&body)?;

    let engine = TransactionEngine::new(store);
    let account = engine
        .update_account(caller.user_id, account_id, command)
        .await?;

    Ok(success(
        StatusCode::OK,
        "Account updated successfully",
        AccountResponse::from(account),
    ))
}

async fn delete_account<S: LedgerStore>(
    State(store): State<S>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(account_id): Path<i64>,
) -> AppResult<(StatusCode, Json<Envelope<()>>)> {
    let engine = TransactionEngine::new(store);
    engine.delete_account(caller.user_id, account_id).await?;

    Ok(success_empty(StatusCode::OK, "Account deleted successfully"))
}

// =========================================================================
// POST /api/transactions
// =========================================================================

/// Submit a deposit, withdrawal, or transfer against a caller-owned
/// account.
async fn create_transaction<S: LedgerStore>(
    State(store): State<S>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(body): Json<TransactionBody>,
) -> AppResult<(StatusCode, Json<Envelope<serde_json::Value>>)> {
    let kind = body
        .kind
        .as_deref()
        .ok_or_else(|| ValidationError("transaction type is required".to_string()))?;
    let kind: TransactionType = kind.parse().map_err(|_| {
        ValidationError("transaction type must be 'deposit', 'withdrawal', or 'transfer'".to_string())
    })?;
    let account_id = parse_id(body.account_id.as_ref())
        .ok_or_else(|| ValidationError("account_id is required".to_string()))?;

    let engine = TransactionEngine::new(store);

    let data = match kind {
        TransactionType::Deposit => {
            let command = DepositCommand::parse(&body)?;
            let (transaction, account) = engine.deposit(caller.user_id, account_id, command).await?;
            json!({
                "transaction": TransactionResponse::from(transaction),
                "account": AccountResponse::from(account),
            })
        }
        TransactionType::Withdrawal => {
            let command = WithdrawCommand::parse(&body)?;
            let (transaction, account) =
                engine.withdraw(caller.user_id, account_id, command).await?;
            json!({
                "transaction": TransactionResponse::from(transaction),
                "account": AccountResponse::from(account),
            })
        }
        TransactionType::Transfer => {
            let command = TransferCommand::parse(&body)?;
            let (transaction, from_account, to_account) =
                engine.transfer(caller.user_id, account_id, command).await?;
            json!({
                "transaction": TransactionResponse::from(transaction),
                "from_account": AccountResponse::from(from_account),
                "to_account": AccountResponse::from(to_account),
            })
        }
    };

    Ok(success(
        StatusCode::CREATED,
        "Transaction created successfully",
        data,
    ))
}

// =========================================================================
// GET /api/transactions
// =========================================================================

async fn list_transactions<S: LedgerStore>(
    State(store): State<S>,
    Extension(caller): Extension<AuthenticatedUser>,
    Query(raw): Query<FilterQuery>,
) -> AppResult<(StatusCode, Json<Envelope<Vec<TransactionResponse>>>)> {
    let filter = TransactionFilter::parse(&raw);

    let query = TransactionQuery::new(store);
    let transactions = query.list(caller.user_id, filter).await?;

    Ok(success(
        StatusCode::OK,
        "Transactions retrieved successfully",
        transactions
            .into_iter()
            .map(TransactionResponse::from)
            .collect(),
    ))
}

// =========================================================================
// GET /api/transactions/:transaction_id
// =========================================================================

async fn get_transaction<S: LedgerStore>(
    State(store): State<S>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(transaction_id): Path<i64>,
) -> AppResult<(StatusCode, Json<Envelope<TransactionResponse>>)> {
    let query = TransactionQuery::new(store);
    let transaction = query.get(caller.user_id, transaction_id).await?;

    Ok(success(
        StatusCode::OK,
        "Transaction retrieved successfully",
        TransactionResponse::from(transaction),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_body_deserialize() {
        let json = r#"{
            "type": "transfer",
            "account_id": 1,
            "amount": "100.50",
            "to_account_id": 2,
            "description": "rent"
        }"#;

        let body: TransactionBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.kind.as_deref(), Some("transfer"));
        assert_eq!(parse_id(body.account_id.as_ref()), Some(1));
        assert_eq!(parse_id(body.to_account_id.as_ref()), Some(2));
        assert_eq!(body.description.as_deref(), Some("rent"));
    }

    #[test]
    fn test_transaction_body_tolerates_missing_fields() {
        let body: TransactionBody = serde_json::from_str("{}").unwrap();
        assert!(body.kind.is_none());
        assert!(body.amount.is_none());
    }

    #[test]
    fn test_account_response_serializes_balance_as_string() {
        let account = Account {
            id: 1,
            user_id: 2,
            account_type: AccountType::Checking,
            account_number: "123456789012".to_string(),
            balance: crate::domain::Balance::new(rust_decimal_macros::dec!(42.50)).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let value = serde_json::to_value(AccountResponse::from(account)).unwrap();
        assert_eq!(value["balance"], "42.50");
        assert_eq!(value["account_type"], "checking");
    }

    #[test]
    fn test_transaction_response_uses_type_key() {
        let transaction = Transaction {
            id: 7,
            from_account_id: None,
            to_account_id: Some(1),
            amount: rust_decimal_macros::dec!(10.00),
            kind: TransactionType::Deposit,
            description: None,
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(TransactionResponse::from(transaction)).unwrap();
        assert_eq!(value["type"], "deposit");
        assert_eq!(value["amount"], "10.00");
        assert!(value["from_account_id"].is_null());
    }
}
