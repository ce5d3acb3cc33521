/// Redeemable credit token model and database operations
///
/// Admins issue tokens worth a fixed number of credits; any signed-in user can
/// redeem a token once. The `is_used` flip is conditional so two concurrent
/// redemptions cannot both succeed.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE credit_tokens (
///     id UUID PRIMARY KEY,
///     code TEXT NOT NULL UNIQUE,
///     credits BIGINT NOT NULL CHECK (credits > 0),
///     description TEXT,
///     created_by TEXT NOT NULL,
///     is_used BOOLEAN NOT NULL DEFAULT FALSE,
///     used_by TEXT,
///     used_at TIMESTAMPTZ,
///     expires_at TIMESTAMPTZ NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Credit token model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreditToken {
    pub id: Uuid,

    /// Redemption code (32 lowercase hex chars)
    pub code: String,

    /// Credits granted on redemption
    pub credits: i64,

    pub description: Option<String>,

    /// Email of the issuing admin
    pub created_by: String,

    pub is_used: bool,

    /// Account that redeemed the token
    pub used_by: Option<String>,

    pub used_at: Option<DateTime<Utc>>,

    pub expires_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
}

/// Input for creating a credit token
#[derive(Debug, Clone)]
pub struct CreateCreditToken {
    pub code: String,
    pub credits: i64,
    pub description: Option<String>,
    pub created_by: String,
    pub expires_at: DateTime<Utc>,
}

/// Listing filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenFilter {
    All,
    Used,
    Unused,
    CreatedBy(String),
}

impl TokenFilter {
    pub fn matches(&self, token: &CreditToken) -> bool {
        match self {
            TokenFilter::All => true,
            TokenFilter::Used => token.is_used,
            TokenFilter::Unused => !token.is_used,
            TokenFilter::CreatedBy(creator) => &token.created_by == creator,
        }
    }
}

impl CreditToken {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Inserts a token
    pub async fn create(pool: &PgPool, data: CreateCreditToken) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, CreditToken>(
            r#"
            INSERT INTO credit_tokens (id, code, credits, description, created_by, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, code, credits, description, created_by, is_used, used_by,
                      used_at, expires_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.code)
        .bind(data.credits)
        .bind(data.description)
        .bind(data.created_by)
        .bind(data.expires_at)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CreditToken>(
            r#"
            SELECT id, code, credits, description, created_by, is_used, used_by,
                   used_at, expires_at, created_at
            FROM credit_tokens
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CreditToken>(
            r#"
            SELECT id, code, credits, description, created_by, is_used, used_by,
                   used_at, expires_at, created_at
            FROM credit_tokens
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Marks an unused, unexpired token as used
    ///
    /// # Returns
    ///
    /// The updated token, or `None` if it was already used, expired or missing
    pub async fn mark_used(pool: &PgPool, code: &str, used_by: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CreditToken>(
            r#"
            UPDATE credit_tokens
            SET is_used = TRUE, used_by = $2, used_at = NOW()
            WHERE code = $1 AND is_used = FALSE AND expires_at > NOW()
            RETURNING id, code, credits, description, created_by, is_used, used_by,
                      used_at, expires_at, created_at
            "#,
        )
        .bind(code)
        .bind(used_by)
        .fetch_optional(pool)
        .await
    }

    /// Deletes an unused token
    pub async fn delete_unused(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM credit_tokens WHERE id = $1 AND is_used = FALSE")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists tokens newest first
    pub async fn list(pool: &PgPool, filter: TokenFilter) -> Result<Vec<Self>, sqlx::Error> {
        let (is_used, created_by) = match filter {
            TokenFilter::All => (None, None),
            TokenFilter::Used => (Some(true), None),
            TokenFilter::Unused => (Some(false), None),
            TokenFilter::CreatedBy(creator) => (None, Some(creator)),
        };

        sqlx::query_as::<_, CreditToken>(
            r#"
            SELECT id, code, credits, description, created_by, is_used, used_by,
                   used_at, expires_at, created_at
            FROM credit_tokens
            WHERE ($1::boolean IS NULL OR is_used = $1)
              AND ($2::text IS NULL OR created_by = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(is_used)
        .bind(created_by)
        .fetch_all(pool)
        .await
    }
}
