/// Persistence traits
///
/// Every component that touches storage depends on one of these traits rather
/// than on a pool, so the pipeline and the HTTP layer run unchanged against
/// PostgreSQL in production and the in-memory backend in tests.
///
/// # Backends
///
/// - [`postgres::PgStore`]: sqlx/PostgreSQL, delegates to `models`
/// - [`memory::MemoryStore`]: mutex-guarded maps with the same atomicity per call
///
/// # Example
///
/// ```
/// use docgate_shared::store::Stores;
///
/// # async fn example() -> Result<(), docgate_shared::store::StoreError> {
/// let stores = Stores::in_memory();
/// stores.accounts.ping().await?;
/// # Ok(())
/// # }
/// ```

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::account::{Account, CreateAccount};
use crate::models::api_key::{ApiKey, CreateApiKey, UpdateApiKey};
use crate::models::credit_token::{CreateCreditToken, CreditToken, TokenFilter};
use crate::models::usage::{DateRange, NewUsageRecord, UsageAggregate, UsageDimension, UsageFilter, UsageRecord};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Row does not exist
    #[error("Record not found")]
    NotFound,

    /// Unique constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Any other backend failure
    #[error("Store error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Accounts and balances
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, user_id: &str) -> StoreResult<Option<Account>>;

    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    /// Creates an account; `Conflict` if the user id or email is taken
    async fn create(&self, data: CreateAccount) -> StoreResult<Account>;

    /// Atomic conditional debit; `None` if missing or insufficient
    async fn debit_if_sufficient(&self, user_id: &str, amount: i64) -> StoreResult<Option<i64>>;

    /// Unconditional credit; `None` if missing
    async fn credit(&self, user_id: &str, amount: i64) -> StoreResult<Option<i64>>;

    /// Connectivity check
    async fn ping(&self) -> StoreResult<()>;
}

/// Opaque API keys
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>>;

    /// Active and unexpired keys only
    async fn get_active_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>>;

    async fn get_for_account(&self, user_id: &str) -> StoreResult<Option<ApiKey>>;

    /// Creates a key, deleting any prior key of the account atomically
    async fn create(&self, data: CreateApiKey) -> StoreResult<ApiKey>;

    async fn update_for_account(&self, user_id: &str, data: UpdateApiKey) -> StoreResult<Option<ApiKey>>;

    /// Deletes the account's keys; returns how many were removed
    async fn revoke_all_for_account(&self, user_id: &str) -> StoreResult<u64>;

    /// Bumps `usage_count` and `last_used_at`
    async fn record_use(&self, key_id: Uuid) -> StoreResult<()>;
}

/// Usage records
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn append(&self, record: NewUsageRecord) -> StoreResult<()>;

    async fn aggregate_by(&self, dimension: UsageDimension, range: DateRange) -> StoreResult<Vec<UsageAggregate>>;

    /// Newest first
    async fn history(&self, filter: UsageFilter, limit: i64, skip: i64) -> StoreResult<Vec<UsageRecord>>;
}

/// Redeemable credit tokens
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn create(&self, data: CreateCreditToken) -> StoreResult<CreditToken>;

    async fn get_by_code(&self, code: &str) -> StoreResult<Option<CreditToken>>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<CreditToken>>;

    /// Flips an unused, unexpired token to used; `None` otherwise
    async fn mark_used(&self, code: &str, used_by: &str) -> StoreResult<Option<CreditToken>>;

    /// Deletes an unused token; `false` if missing or already used
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;

    /// Newest first
    async fn list(&self, filter: TokenFilter) -> StoreResult<Vec<CreditToken>>;
}

/// Bundle of store handles shared by the services
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub keys: Arc<dyn KeyStore>,
    pub usage: Arc<dyn UsageStore>,
    pub tokens: Arc<dyn TokenStore>,
}

impl Stores {
    /// PostgreSQL-backed stores sharing one pool
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(postgres::PgStore::new(pool));
        Self {
            accounts: store.clone(),
            keys: store.clone(),
            usage: store.clone(),
            tokens: store,
        }
    }

    /// In-memory stores sharing one state
    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(memory::MemoryStore::new()))
    }

    /// Stores backed by an existing in-memory state
    pub fn from_memory(store: Arc<memory::MemoryStore>) -> Self {
        Self {
            accounts: store.clone(),
            keys: store.clone(),
            usage: store.clone(),
            tokens: store,
        }
    }
}
