/// PostgreSQL store backend
///
/// Thin adapter from the store traits to the model queries. Unique violations
/// surface as `StoreError::Conflict`.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{AccountStore, KeyStore, StoreError, StoreResult, TokenStore, UsageStore};
use crate::db::pool::health_check;
use crate::models::account::{Account, CreateAccount};
use crate::models::api_key::{ApiKey, CreateApiKey, UpdateApiKey};
use crate::models::credit_token::{CreateCreditToken, CreditToken, TokenFilter};
use crate::models::usage::{DateRange, NewUsageRecord, UsageAggregate, UsageDimension, UsageFilter, UsageRecord};

/// Store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Maps unique violations to `Conflict`
fn map_unique(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl AccountStore for PgStore {
    async fn get(&self, user_id: &str) -> StoreResult<Option<Account>> {
        Ok(Account::find_by_user_id(&self.pool, user_id).await?)
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        Ok(Account::find_by_email(&self.pool, email).await?)
    }

    async fn create(&self, data: CreateAccount) -> StoreResult<Account> {
        let user_id = data.user_id.clone();
        Account::create(&self.pool, data)
            .await
            .map_err(map_unique)?
            .ok_or_else(|| StoreError::Conflict(format!("account {} already exists", user_id)))
    }

    async fn debit_if_sufficient(&self, user_id: &str, amount: i64) -> StoreResult<Option<i64>> {
        Ok(Account::debit_if_sufficient(&self.pool, user_id, amount).await?)
    }

    async fn credit(&self, user_id: &str, amount: i64) -> StoreResult<Option<i64>> {
        Ok(Account::credit(&self.pool, user_id, amount).await?)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(health_check(&self.pool).await?)
    }
}

#[async_trait]
impl KeyStore for PgStore {
    async fn get_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        Ok(ApiKey::find_by_hash(&self.pool, key_hash).await?)
    }

    async fn get_active_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        Ok(ApiKey::find_active_by_hash(&self.pool, key_hash).await?)
    }

    async fn get_for_account(&self, user_id: &str) -> StoreResult<Option<ApiKey>> {
        Ok(ApiKey::find_by_user_id(&self.pool, user_id).await?)
    }

    async fn create(&self, data: CreateApiKey) -> StoreResult<ApiKey> {
        ApiKey::create(&self.pool, data).await.map_err(map_unique)
    }

    async fn update_for_account(&self, user_id: &str, data: UpdateApiKey) -> StoreResult<Option<ApiKey>> {
        Ok(ApiKey::update_for_user(&self.pool, user_id, data).await?)
    }

    async fn revoke_all_for_account(&self, user_id: &str) -> StoreResult<u64> {
        Ok(ApiKey::delete_for_user(&self.pool, user_id).await?)
    }

    async fn record_use(&self, key_id: Uuid) -> StoreResult<()> {
        Ok(ApiKey::record_use(&self.pool, key_id).await?)
    }
}

#[async_trait]
impl UsageStore for PgStore {
    async fn append(&self, record: NewUsageRecord) -> StoreResult<()> {
        UsageRecord::insert(&self.pool, record).await?;
        Ok(())
    }

    async fn aggregate_by(&self, dimension: UsageDimension, range: DateRange) -> StoreResult<Vec<UsageAggregate>> {
        Ok(UsageRecord::aggregate(&self.pool, dimension, range).await?)
    }

    async fn history(&self, filter: UsageFilter, limit: i64, skip: i64) -> StoreResult<Vec<UsageRecord>> {
        Ok(UsageRecord::history(&self.pool, filter, limit, skip).await?)
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn create(&self, data: CreateCreditToken) -> StoreResult<CreditToken> {
        CreditToken::create(&self.pool, data).await.map_err(map_unique)
    }

    async fn get_by_code(&self, code: &str) -> StoreResult<Option<CreditToken>> {
        Ok(CreditToken::find_by_code(&self.pool, code).await?)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<CreditToken>> {
        Ok(CreditToken::find_by_id(&self.pool, id).await?)
    }

    async fn mark_used(&self, code: &str, used_by: &str) -> StoreResult<Option<CreditToken>> {
        Ok(CreditToken::mark_used(&self.pool, code, used_by).await?)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        Ok(CreditToken::delete_unused(&self.pool, id).await?)
    }

    async fn list(&self, filter: TokenFilter) -> StoreResult<Vec<CreditToken>> {
        Ok(CreditToken::list(&self.pool, filter).await?)
    }
}
