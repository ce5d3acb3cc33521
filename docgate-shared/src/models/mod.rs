/// Database models for docgate
///
/// Each model is a `sqlx::FromRow` struct with its PostgreSQL queries as
/// associated functions taking a `&PgPool`. The `store::postgres` backend
/// delegates to these functions.
///
/// # Models
///
/// - `account`: Credit-holding accounts
/// - `api_key`: Opaque API keys (one per account)
/// - `usage`: Append-only usage records and aggregates
/// - `credit_token`: Redeemable credit tokens
///
/// # Example
///
/// ```no_run
/// use docgate_shared::models::account::{Account, CreateAccount};
/// use docgate_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let account = Account::create(&pool, CreateAccount {
///     user_id: "user-1".to_string(),
///     email: "user@example.com".to_string(),
///     balance: 0,
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```

pub mod account;
pub mod api_key;
pub mod credit_token;
pub mod usage;
