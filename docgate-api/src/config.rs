/// Configuration management for the API server
///
/// Loads configuration from environment variables into a typed struct. A
/// `.env` file is honored in development.
///
/// # Environment Variables
///
/// - `API_HOST` / `API_PORT`: bind address (default `0.0.0.0:8080`)
/// - `APP_ENV`: `production` enables HSTS (default `development`)
/// - `CORS_ORIGINS`: comma-separated origins (default `*`)
/// - `REQUEST_TIMEOUT_SECS`: outer request deadline (default 90)
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default 10)
/// - `AUTH_ISSUER_URL`: trusted token issuer (required)
/// - `AUTH_JWKS_URI`: key set location (default `{issuer}/.well-known/jwks.json`)
/// - `AUTH_JWKS_CACHE_TTL_SECS`: key set cache TTL (default 3600)
/// - `STARTING_CREDITS`: grant for new accounts (default 10)
/// - `USAGE_RECORDER_WORKERS` / `USAGE_RECORDER_QUEUE`: recorder pool (default 4 / 1024)
/// - `*_API_URL`: upstream endpoints, one per catalog operation
///
/// # Example
///
/// ```no_run
/// use docgate_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use docgate_pipeline::catalog::default_descriptors;
use docgate_pipeline::recorder::RecorderConfig;
use docgate_shared::accounts::DEFAULT_STARTING_CREDITS;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,

    pub database: DatabaseConfig,

    pub auth: AuthConfig,

    pub billing: BillingConfig,

    pub upstream: UpstreamConfig,

    pub recorder: UsageRecorderConfig,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,

    pub port: u16,

    /// Enables HSTS
    pub production: bool,

    /// Allowed origins; `*` means permissive
    pub cors_origins: Vec<String>,

    /// Outer deadline for every request (seconds)
    pub request_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,
}

/// Signed-token trust configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Expected `iss` claim
    pub issuer_url: String,

    /// Explicit key set URL; derived from the issuer when absent
    pub jwks_uri: Option<String>,

    pub jwks_cache_ttl_secs: u64,
}

/// Credit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Grant for registered and auto-provisioned accounts
    pub starting_credits: i64,
}

/// Upstream URLs keyed by environment variable name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub urls: BTreeMap<String, String>,
}

impl UpstreamConfig {
    pub fn url_for(&self, variable: &str) -> Option<String> {
        self.urls.get(variable).cloned()
    }
}

/// Usage recorder pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecorderConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl From<&UsageRecorderConfig> for RecorderConfig {
    fn from(config: &UsageRecorderConfig) -> Self {
        RecorderConfig {
            workers: config.workers,
            capacity: config.queue_capacity,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `DATABASE_URL` or `AUTH_ISSUER_URL` is missing
    /// - A numeric variable does not parse
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let issuer_url = var("AUTH_ISSUER_URL")
            .context("AUTH_ISSUER_URL environment variable is required")?
            .trim_end_matches('/')
            .to_string();

        let cors_origins = var("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let urls = default_descriptors()
            .into_iter()
            .filter_map(|d| var(d.upstream_env).map(|url| (d.upstream_env.to_string(), url)))
            .collect();

        Ok(Self {
            api: ApiConfig {
                host: var("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&var, "API_PORT", 8080)?,
                production: var("APP_ENV").map_or(false, |env| env.eq_ignore_ascii_case("production")),
                cors_origins,
                request_timeout_secs: parse_or(&var, "REQUEST_TIMEOUT_SECS", 90)?,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", 10)?,
            },
            auth: AuthConfig {
                issuer_url,
                jwks_uri: var("AUTH_JWKS_URI"),
                jwks_cache_ttl_secs: parse_or(&var, "AUTH_JWKS_CACHE_TTL_SECS", 3600)?,
            },
            billing: BillingConfig {
                starting_credits: parse_or(&var, "STARTING_CREDITS", DEFAULT_STARTING_CREDITS)?,
            },
            upstream: UpstreamConfig { urls },
            recorder: UsageRecorderConfig {
                workers: parse_or(&var, "USAGE_RECORDER_WORKERS", 4)?,
                queue_capacity: parse_or(&var, "USAGE_RECORDER_QUEUE", 1024)?,
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs.max(1))
    }

    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.auth.jwks_cache_ttl_secs)
    }
}

fn parse_or<T, F>(var: &F, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {}", name, raw)),
        None => Ok(default),
    }
}
