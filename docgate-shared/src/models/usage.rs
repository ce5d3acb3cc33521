/// Usage record model and database operations
///
/// One immutable row per metered request outcome. Rows are written by the
/// usage recorder off the request path and only read by the analytics
/// endpoints.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE usage_records (
///     id UUID PRIMARY KEY,
///     user_id TEXT NOT NULL,
///     email TEXT NOT NULL,
///     operation_name TEXT NOT NULL,
///     endpoint TEXT NOT NULL,
///     method VARCHAR(10) NOT NULL,
///     success BOOLEAN NOT NULL,
///     error_message TEXT,
///     credits_charged BIGINT NOT NULL DEFAULT 0,
///     request_id TEXT,
///     ip_address TEXT,
///     user_agent TEXT,
///     auth_method VARCHAR(20) NOT NULL,
///     processing_time_ms BIGINT NOT NULL DEFAULT 0,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use docgate_shared::models::usage::{DateRange, UsageDimension, UsageRecord};
/// use docgate_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let per_service = UsageRecord::aggregate(&pool, UsageDimension::Operation, DateRange::default()).await?;
/// for row in per_service {
///     println!("{:?}: {} calls", row.service_name, row.total_calls);
/// }
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Default page size for history queries
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Largest page size for history queries
pub const MAX_HISTORY_LIMIT: i64 = 500;

/// Persisted usage record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageRecord {
    pub id: Uuid,
    pub user_id: String,
    pub email: String,

    /// Usage service name of the operation (e.g. `face-detection`)
    pub operation_name: String,

    pub endpoint: String,
    pub method: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub credits_charged: i64,
    pub request_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,

    /// `bearer_token` or `api_key`
    pub auth_method: String,

    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Usage record awaiting persistence
///
/// `created_at` is captured when the outcome is known, not when the write
/// lands, so queued records keep their real timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUsageRecord {
    pub user_id: String,
    pub email: String,
    pub operation_name: String,
    pub endpoint: String,
    pub method: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub credits_charged: i64,
    pub request_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub auth_method: String,
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl NewUsageRecord {
    /// Materializes the record with a fresh id
    pub fn into_record(self) -> UsageRecord {
        UsageRecord {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            email: self.email,
            operation_name: self.operation_name,
            endpoint: self.endpoint,
            method: self.method,
            success: self.success,
            error_message: self.error_message,
            credits_charged: self.credits_charged,
            request_id: self.request_id,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            auth_method: self.auth_method,
            processing_time_ms: self.processing_time_ms,
            created_at: self.created_at,
        }
    }
}

/// Grouping for aggregate queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageDimension {
    /// Per operation (service)
    Operation,

    /// Per account
    User,

    /// Per (operation, account) pair
    OperationAndUser,
}

/// Inclusive start / exclusive end filter on `created_at`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Whether a timestamp falls inside the range
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at < end)
    }
}

/// Filter for history queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageFilter {
    pub user_id: Option<String>,
    pub operation_name: Option<String>,
}

impl UsageFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            operation_name: None,
        }
    }

    pub fn for_operation(operation_name: impl Into<String>) -> Self {
        Self {
            user_id: None,
            operation_name: Some(operation_name.into()),
        }
    }

    /// Whether a record passes the filter
    pub fn matches(&self, record: &UsageRecord) -> bool {
        self.user_id.as_deref().map_or(true, |id| record.user_id == id)
            && self
                .operation_name
                .as_deref()
                .map_or(true, |name| record.operation_name == name)
    }
}

/// Aggregated usage row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageAggregate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    pub total_calls: i64,
    pub success_calls: i64,
    pub failed_calls: i64,
    pub total_credits: i64,
    pub last_used: Option<DateTime<Utc>>,
}

impl UsageRecord {
    /// Appends a record
    pub async fn insert(pool: &PgPool, record: NewUsageRecord) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO usage_records (
                id, user_id, email, operation_name, endpoint, method, success,
                error_message, credits_charged, request_id, ip_address, user_agent,
                auth_method, processing_time_ms, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(id)
        .bind(record.user_id)
        .bind(record.email)
        .bind(record.operation_name)
        .bind(record.endpoint)
        .bind(record.method)
        .bind(record.success)
        .bind(record.error_message)
        .bind(record.credits_charged)
        .bind(record.request_id)
        .bind(record.ip_address)
        .bind(record.user_agent)
        .bind(record.auth_method)
        .bind(record.processing_time_ms)
        .bind(record.created_at)
        .execute(pool)
        .await?;

        Ok(id)
    }

    /// Aggregates usage along one dimension, busiest first
    pub async fn aggregate(
        pool: &PgPool,
        dimension: UsageDimension,
        range: DateRange,
    ) -> Result<Vec<UsageAggregate>, sqlx::Error> {
        let (keys, group_by, order_by) = match dimension {
            UsageDimension::Operation => (
                "operation_name AS service_name, NULL::TEXT AS user_id, NULL::TEXT AS email",
                "operation_name",
                "operation_name",
            ),
            UsageDimension::User => (
                "NULL::TEXT AS service_name, user_id, MAX(email) AS email",
                "user_id",
                "user_id",
            ),
            UsageDimension::OperationAndUser => (
                "operation_name AS service_name, user_id, MAX(email) AS email",
                "operation_name, user_id",
                "operation_name, user_id",
            ),
        };

        let sql = format!(
            r#"
            SELECT {keys},
                   COUNT(*) AS total_calls,
                   COUNT(*) FILTER (WHERE success) AS success_calls,
                   COUNT(*) FILTER (WHERE NOT success) AS failed_calls,
                   COALESCE(SUM(credits_charged), 0)::BIGINT AS total_credits,
                   MAX(created_at) AS last_used
            FROM usage_records
            WHERE ($1::timestamptz IS NULL OR created_at >= $1)
              AND ($2::timestamptz IS NULL OR created_at < $2)
            GROUP BY {group_by}
            ORDER BY total_calls DESC, {order_by}
            "#
        );

        sqlx::query_as::<_, UsageAggregate>(&sql)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(pool)
            .await
    }

    /// Lists records newest first
    pub async fn history(
        pool: &PgPool,
        filter: UsageFilter,
        limit: i64,
        skip: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, UsageRecord>(
            r#"
            SELECT id, user_id, email, operation_name, endpoint, method, success,
                   error_message, credits_charged, request_id, ip_address, user_agent,
                   auth_method, processing_time_ms, created_at
            FROM usage_records
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR operation_name = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.operation_name)
        .bind(limit)
        .bind(skip)
        .fetch_all(pool)
        .await
    }
}
