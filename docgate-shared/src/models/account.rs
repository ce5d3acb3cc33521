/// Account model and database operations
///
/// An account holds a prepaid credit balance. Balances only move through the
/// conditional debit and the unconditional credit below; the table carries a
/// `CHECK (balance >= 0)` constraint as a second line.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE accounts (
///     user_id TEXT PRIMARY KEY,
///     email TEXT NOT NULL UNIQUE,
///     balance BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Account model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Account identifier (external user id, or the email for auto-provisioned accounts)
    pub user_id: String,

    /// Owner email (unique)
    pub email: String,

    /// Credit balance, never negative
    pub balance: i64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Input for creating an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccount {
    pub user_id: String,
    pub email: String,
    pub balance: i64,
}

impl Account {
    /// Creates an account
    ///
    /// # Returns
    ///
    /// `None` when an account with the same user id or email already exists
    pub async fn create(pool: &PgPool, data: CreateAccount) -> Result<Option<Self>, sqlx::Error> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (user_id, email, balance)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            RETURNING user_id, email, balance, created_at, updated_at
            "#,
        )
        .bind(data.user_id)
        .bind(data.email)
        .bind(data.balance)
        .fetch_optional(pool)
        .await?;

        Ok(account)
    }

    /// Finds an account by user id
    pub async fn find_by_user_id(pool: &PgPool, user_id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT user_id, email, balance, created_at, updated_at
            FROM accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Finds an account by email
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT user_id, email, balance, created_at, updated_at
            FROM accounts
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    /// Atomically debits `amount` if the balance covers it
    ///
    /// # Returns
    ///
    /// The new balance, or `None` when the account is missing or the balance
    /// is too low. Concurrent debits serialize on the row lock, so the
    /// balance can never go negative.
    pub async fn debit_if_sufficient(
        pool: &PgPool,
        user_id: &str,
        amount: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        let balance = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE accounts
            SET balance = balance - $2, updated_at = NOW()
            WHERE user_id = $1 AND balance >= $2
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(pool)
        .await?;

        Ok(balance)
    }

    /// Adds `amount` to the balance
    ///
    /// # Returns
    ///
    /// The new balance, or `None` when the account is missing
    pub async fn credit(pool: &PgPool, user_id: &str, amount: i64) -> Result<Option<i64>, sqlx::Error> {
        let balance = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE accounts
            SET balance = balance + $2, updated_at = NOW()
            WHERE user_id = $1
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(pool)
        .await?;

        Ok(balance)
    }
}
