/// API key model and database operations
///
/// Opaque keys let machine clients call metered operations without a signed
/// token. Each account holds at most one key: creating a key deletes any prior
/// key for the account inside the same transaction, and the unique index on
/// `user_id` backs that up.
///
/// # Security
///
/// - Keys are stored as SHA-256 hashes (never plaintext)
/// - The plaintext is returned exactly once, on creation
/// - `key_hash` is never serialized into API responses
///
/// # Schema
///
/// ```sql
/// CREATE TABLE api_keys (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id TEXT NOT NULL UNIQUE REFERENCES accounts(user_id) ON DELETE CASCADE,
///     email TEXT NOT NULL,
///     key_name VARCHAR(50) NOT NULL,
///     key_hash TEXT NOT NULL UNIQUE,
///     key_prefix VARCHAR(16) NOT NULL,
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     usage_count BIGINT NOT NULL DEFAULT 0,
///     last_used_at TIMESTAMPTZ,
///     expires_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// API key model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: Uuid,

    /// Owning account
    pub user_id: String,

    /// Owner email at creation time
    pub email: String,

    /// Human-readable name (1-50 chars)
    pub key_name: String,

    /// SHA-256 hex digest of the full key
    #[serde(skip_serializing)]
    pub key_hash: String,

    /// Display prefix (`ak_live_` + 8 hex chars)
    pub key_prefix: String,

    pub is_active: bool,

    /// Number of authenticated requests made with this key
    pub usage_count: i64,

    pub last_used_at: Option<DateTime<Utc>>,

    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Input for creating an API key
#[derive(Debug, Clone)]
pub struct CreateApiKey {
    pub user_id: String,
    pub email: String,
    pub key_name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial update of an API key
#[derive(Debug, Clone, Default)]
pub struct UpdateApiKey {
    pub key_name: Option<String>,
    pub is_active: Option<bool>,
}

/// Summary of an account's keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyStats {
    pub total_keys: i64,
    pub active_keys: i64,
    pub inactive_keys: i64,
    pub expired_keys: i64,
    pub total_usage: i64,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyStats {
    /// Builds stats from the keys an account holds
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a ApiKey>) -> Self {
        let mut stats = Self::default();

        for key in keys {
            stats.total_keys += 1;
            if key.is_expired() {
                stats.expired_keys += 1;
            } else if key.is_active {
                stats.active_keys += 1;
            } else {
                stats.inactive_keys += 1;
            }
            stats.total_usage += key.usage_count;
            stats.last_used_at = stats.last_used_at.max(key.last_used_at);
        }

        stats
    }
}

impl ApiKey {
    /// Checks if the key is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |expires_at| expires_at <= Utc::now())
    }

    /// Whether the key may authenticate requests
    pub fn is_usable(&self) -> bool {
        self.is_active && !self.is_expired()
    }

    /// Creates a key, replacing any existing key for the account
    pub async fn create(pool: &PgPool, data: CreateApiKey) -> Result<Self, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM api_keys WHERE user_id = $1")
            .bind(&data.user_id)
            .execute(&mut *tx)
            .await?;

        let api_key = sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO api_keys (user_id, email, key_name, key_hash, key_prefix, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, email, key_name, key_hash, key_prefix, is_active,
                      usage_count, last_used_at, expires_at, created_at, updated_at
            "#,
        )
        .bind(data.user_id)
        .bind(data.email)
        .bind(data.key_name)
        .bind(data.key_hash)
        .bind(data.key_prefix)
        .bind(data.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(api_key)
    }

    /// Finds a key by hash regardless of state
    pub async fn find_by_hash(pool: &PgPool, key_hash: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT id, user_id, email, key_name, key_hash, key_prefix, is_active,
                   usage_count, last_used_at, expires_at, created_at, updated_at
            FROM api_keys
            WHERE key_hash = $1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(pool)
        .await
    }

    /// Finds an active, unexpired key by hash
    pub async fn find_active_by_hash(pool: &PgPool, key_hash: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT id, user_id, email, key_name, key_hash, key_prefix, is_active,
                   usage_count, last_used_at, expires_at, created_at, updated_at
            FROM api_keys
            WHERE key_hash = $1
              AND is_active = TRUE
              AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key_hash)
        .fetch_optional(pool)
        .await
    }

    /// Finds the key held by an account
    pub async fn find_by_user_id(pool: &PgPool, user_id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT id, user_id, email, key_name, key_hash, key_prefix, is_active,
                   usage_count, last_used_at, expires_at, created_at, updated_at
            FROM api_keys
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Updates name and/or active flag of an account's key
    pub async fn update_for_user(
        pool: &PgPool,
        user_id: &str,
        data: UpdateApiKey,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ApiKey>(
            r#"
            UPDATE api_keys
            SET key_name = COALESCE($2, key_name),
                is_active = COALESCE($3, is_active),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING id, user_id, email, key_name, key_hash, key_prefix, is_active,
                      usage_count, last_used_at, expires_at, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(data.key_name)
        .bind(data.is_active)
        .fetch_optional(pool)
        .await
    }

    /// Deletes every key held by an account
    pub async fn delete_for_user(pool: &PgPool, user_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM api_keys WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Bumps usage counters after a successful authentication
    pub async fn record_use(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE api_keys
            SET usage_count = usage_count + 1, last_used_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(is_active: bool, expires_at: Option<DateTime<Utc>>, usage_count: i64) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            email: "user@example.com".to_string(),
            key_name: "ci".to_string(),
            key_hash: "0".repeat(64),
            key_prefix: "ak_live_00000000".to_string(),
            is_active,
            usage_count,
            last_used_at: None,
            expires_at,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_is_expired() {
        assert!(!key(true, None, 0).is_expired());
        assert!(!key(true, Some(Utc::now() + Duration::days(1)), 0).is_expired());
        assert!(key(true, Some(Utc::now() - Duration::seconds(1)), 0).is_expired());
    }

    #[test]
    fn test_is_usable() {
        assert!(key(true, None, 0).is_usable());
        assert!(!key(false, None, 0).is_usable());
        assert!(!key(true, Some(Utc::now() - Duration::days(1)), 0).is_usable());
    }

    #[test]
    fn test_key_hash_not_serialized() {
        let json = serde_json::to_value(key(true, None, 0)).unwrap();
        assert!(json.get("keyHash").is_none());
        assert_eq!(json["keyPrefix"], "ak_live_00000000");
    }

    #[test]
    fn test_stats_from_keys() {
        let keys = vec![
            key(true, None, 3),
            key(false, None, 2),
            key(true, Some(Utc::now() - Duration::days(1)), 5),
        ];

        let stats = ApiKeyStats::from_keys(&keys);
        assert_eq!(stats.total_keys, 3);
        assert_eq!(stats.active_keys, 1);
        assert_eq!(stats.inactive_keys, 1);
        assert_eq!(stats.expired_keys, 1);
        assert_eq!(stats.total_usage, 10);
    }
}
