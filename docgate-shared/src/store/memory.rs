/// In-memory store backend
///
/// All state sits behind one async mutex, so every trait call is atomic the
/// same way the single-statement PostgreSQL queries are. Used by tests and by
/// local runs without a database.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AccountStore, KeyStore, StoreError, StoreResult, TokenStore, UsageStore};
use crate::models::account::{Account, CreateAccount};
use crate::models::api_key::{ApiKey, CreateApiKey, UpdateApiKey};
use crate::models::credit_token::{CreateCreditToken, CreditToken, TokenFilter};
use crate::models::usage::{DateRange, NewUsageRecord, UsageAggregate, UsageDimension, UsageFilter, UsageRecord};

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    keys: HashMap<Uuid, ApiKey>,
    usage: Vec<UsageRecord>,
    tokens: HashMap<Uuid, CreditToken>,
}

/// Mutex-guarded in-memory store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All usage records in insertion order
    pub async fn usage_snapshot(&self) -> Vec<UsageRecord> {
        self.state.lock().await.usage.clone()
    }

    /// Number of stored keys across all accounts
    pub async fn key_count(&self) -> usize {
        self.state.lock().await.keys.len()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get(&self, user_id: &str) -> StoreResult<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(user_id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn create(&self, data: CreateAccount) -> StoreResult<Account> {
        let mut state = self.state.lock().await;

        if state.accounts.contains_key(&data.user_id)
            || state.accounts.values().any(|a| a.email == data.email)
        {
            return Err(StoreError::Conflict(format!(
                "account {} already exists",
                data.user_id
            )));
        }

        let now = Utc::now();
        let account = Account {
            user_id: data.user_id,
            email: data.email,
            balance: data.balance,
            created_at: now,
            updated_at: now,
        };
        state.accounts.insert(account.user_id.clone(), account.clone());

        Ok(account)
    }

    async fn debit_if_sufficient(&self, user_id: &str, amount: i64) -> StoreResult<Option<i64>> {
        let mut state = self.state.lock().await;

        match state.accounts.get_mut(user_id) {
            Some(account) if account.balance >= amount => {
                account.balance -= amount;
                account.updated_at = Utc::now();
                Ok(Some(account.balance))
            }
            _ => Ok(None),
        }
    }

    async fn credit(&self, user_id: &str, amount: i64) -> StoreResult<Option<i64>> {
        let mut state = self.state.lock().await;

        Ok(state.accounts.get_mut(user_id).map(|account| {
            account.balance += amount;
            account.updated_at = Utc::now();
            account.balance
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn get_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        let state = self.state.lock().await;
        Ok(state.keys.values().find(|k| k.key_hash == key_hash).cloned())
    }

    async fn get_active_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        let state = self.state.lock().await;
        Ok(state
            .keys
            .values()
            .find(|k| k.key_hash == key_hash && k.is_usable())
            .cloned())
    }

    async fn get_for_account(&self, user_id: &str) -> StoreResult<Option<ApiKey>> {
        let state = self.state.lock().await;
        Ok(state.keys.values().find(|k| k.user_id == user_id).cloned())
    }

    async fn create(&self, data: CreateApiKey) -> StoreResult<ApiKey> {
        let mut state = self.state.lock().await;

        if !state.accounts.contains_key(&data.user_id) {
            return Err(StoreError::Internal(format!(
                "account {} does not exist",
                data.user_id
            )));
        }
        if state.keys.values().any(|k| k.key_hash == data.key_hash) {
            return Err(StoreError::Conflict("key hash already exists".to_string()));
        }

        state.keys.retain(|_, key| key.user_id != data.user_id);

        let now = Utc::now();
        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id: data.user_id,
            email: data.email,
            key_name: data.key_name,
            key_hash: data.key_hash,
            key_prefix: data.key_prefix,
            is_active: true,
            usage_count: 0,
            last_used_at: None,
            expires_at: data.expires_at,
            created_at: now,
            updated_at: now,
        };
        state.keys.insert(key.id, key.clone());

        Ok(key)
    }

    async fn update_for_account(&self, user_id: &str, data: UpdateApiKey) -> StoreResult<Option<ApiKey>> {
        let mut state = self.state.lock().await;

        Ok(state
            .keys
            .values_mut()
            .find(|k| k.user_id == user_id)
            .map(|key| {
                if let Some(name) = data.key_name {
                    key.key_name = name;
                }
                if let Some(active) = data.is_active {
                    key.is_active = active;
                }
                key.updated_at = Utc::now();
                key.clone()
            }))
    }

    async fn revoke_all_for_account(&self, user_id: &str) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.keys.len();
        state.keys.retain(|_, key| key.user_id != user_id);
        Ok((before - state.keys.len()) as u64)
    }

    async fn record_use(&self, key_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(key) = state.keys.get_mut(&key_id) {
            key.usage_count += 1;
            key.last_used_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[derive(Default)]
struct Totals {
    email: Option<String>,
    total_calls: i64,
    success_calls: i64,
    total_credits: i64,
    last_used: Option<chrono::DateTime<Utc>>,
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn append(&self, record: NewUsageRecord) -> StoreResult<()> {
        self.state.lock().await.usage.push(record.into_record());
        Ok(())
    }

    async fn aggregate_by(&self, dimension: UsageDimension, range: DateRange) -> StoreResult<Vec<UsageAggregate>> {
        let state = self.state.lock().await;
        let mut groups: BTreeMap<(Option<String>, Option<String>), Totals> = BTreeMap::new();

        for record in state.usage.iter().filter(|r| range.contains(r.created_at)) {
            let key = match dimension {
                UsageDimension::Operation => (Some(record.operation_name.clone()), None),
                UsageDimension::User => (None, Some(record.user_id.clone())),
                UsageDimension::OperationAndUser => {
                    (Some(record.operation_name.clone()), Some(record.user_id.clone()))
                }
            };

            let totals = groups.entry(key).or_default();
            totals.total_calls += 1;
            if record.success {
                totals.success_calls += 1;
            }
            totals.total_credits += record.credits_charged;
            totals.last_used = totals.last_used.max(Some(record.created_at));
            if dimension != UsageDimension::Operation {
                totals.email = totals.email.clone().max(Some(record.email.clone()));
            }
        }

        let mut rows: Vec<UsageAggregate> = groups
            .into_iter()
            .map(|((service_name, user_id), totals)| UsageAggregate {
                service_name,
                user_id,
                email: totals.email,
                total_calls: totals.total_calls,
                success_calls: totals.success_calls,
                failed_calls: totals.total_calls - totals.success_calls,
                total_credits: totals.total_credits,
                last_used: totals.last_used,
            })
            .collect();

        // Stable sort keeps the key order among equal counts
        rows.sort_by(|a, b| b.total_calls.cmp(&a.total_calls));

        Ok(rows)
    }

    async fn history(&self, filter: UsageFilter, limit: i64, skip: i64) -> StoreResult<Vec<UsageRecord>> {
        let state = self.state.lock().await;

        let mut records: Vec<UsageRecord> = state
            .usage
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(records
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn create(&self, data: CreateCreditToken) -> StoreResult<CreditToken> {
        let mut state = self.state.lock().await;

        if state.tokens.values().any(|t| t.code == data.code) {
            return Err(StoreError::Conflict("token code already exists".to_string()));
        }

        let token = CreditToken {
            id: Uuid::new_v4(),
            code: data.code,
            credits: data.credits,
            description: data.description,
            created_by: data.created_by,
            is_used: false,
            used_by: None,
            used_at: None,
            expires_at: data.expires_at,
            created_at: Utc::now(),
        };
        state.tokens.insert(token.id, token.clone());

        Ok(token)
    }

    async fn get_by_code(&self, code: &str) -> StoreResult<Option<CreditToken>> {
        let state = self.state.lock().await;
        Ok(state.tokens.values().find(|t| t.code == code).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<CreditToken>> {
        Ok(self.state.lock().await.tokens.get(&id).cloned())
    }

    async fn mark_used(&self, code: &str, used_by: &str) -> StoreResult<Option<CreditToken>> {
        let mut state = self.state.lock().await;

        Ok(state
            .tokens
            .values_mut()
            .find(|t| t.code == code && !t.is_used && !t.is_expired())
            .map(|token| {
                token.is_used = true;
                token.used_by = Some(used_by.to_string());
                token.used_at = Some(Utc::now());
                token.clone()
            }))
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.lock().await;

        let removable = matches!(state.tokens.get(&id), Some(token) if !token.is_used);
        if removable {
            state.tokens.remove(&id);
        }
        Ok(removable)
    }

    async fn list(&self, filter: TokenFilter) -> StoreResult<Vec<CreditToken>> {
        let state = self.state.lock().await;

        let mut tokens: Vec<CreditToken> = state
            .tokens
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(tokens)
    }
}
