/// Database migration runner
///
/// Migrations live in the workspace-level `migrations/` directory and are
/// embedded into the binary at compile time with `sqlx::migrate!`.
///
/// | Migration | Table | Invariant it backs |
/// |---|---|---|
/// | `..._create_accounts` | `accounts` | `balance >= 0`, unique email |
/// | `..._create_api_keys` | `api_keys` | one key per account, unique hash |
/// | `..._create_usage_records` | `usage_records` | append-only audit |
/// | `..._create_credit_tokens` | `credit_tokens` | unique code, positive value |

use sqlx::{migrate::MigrateDatabase, postgres::PgPool, Postgres};
use tracing::{debug, info, warn};

/// Runs all pending migrations
///
/// # Errors
///
/// Returns an error if a migration fails; the failing migration is rolled back.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Running database migrations");

    match sqlx::migrate!("../migrations").run(pool).await {
        Ok(()) => {
            info!("Database schema is up to date");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Migration failed");
            Err(e)
        }
    }
}

/// Creates the database if it does not exist yet
///
/// Intended for development setups; production databases are provisioned
/// ahead of time.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), sqlx::Error> {
    if Postgres::database_exists(database_url).await? {
        debug!("Database already exists");
    } else {
        info!("Database does not exist, creating it");
        Postgres::create_database(database_url).await?;
    }

    Ok(())
}
