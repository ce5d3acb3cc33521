//! # DocGate API Server
//!
//! Credit-metered gateway in front of the document-processing services.
//!
//! ## Architecture
//!
//! The API server is built with Axum and provides:
//! - Metered operation endpoints (`/api/v1/operations/:operation`)
//! - Authentication (issuer-signed tokens + opaque API keys)
//! - Credit balances, redeemable credit tokens and usage analytics
//!
//! Usage records are written by a background worker pool that is drained on
//! shutdown.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/docgate \
//! AUTH_ISSUER_URL=https://auth.example.com \
//! cargo run -p docgate-api
//! ```

use anyhow::Context;
use docgate_api::{
    app::{build_router, AppState},
    config::Config,
};
use docgate_pipeline::{
    catalog::{default_descriptors, Catalog},
    recorder::UsageRecorder,
};
use docgate_shared::{
    auth::{
        jwks::{HttpKeySetSource, KeySetCache},
        jwt::SignedTokenVerifier,
    },
    db::{
        migrations::{ensure_database_exists, run_migrations},
        pool::{create_pool, DatabaseConfig},
    },
    store::Stores,
};
use std::{net::SocketAddr, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("DocGate API Server v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    ensure_database_exists(&config.database.url)
        .await
        .context("Failed to create database")?;
    let pool = create_pool(DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        ..Default::default()
    })
    .await
    .context("Failed to connect to database")?;
    run_migrations(&pool).await.context("Failed to run migrations")?;

    let stores = Stores::postgres(pool);

    let source = HttpKeySetSource::new(config.auth.jwks_uri.clone())?;
    let keys = KeySetCache::new(Arc::new(source), config.jwks_cache_ttl());
    let verifier = Arc::new(SignedTokenVerifier::new(config.auth.issuer_url.clone(), keys));

    let catalog = Catalog::from_upstreams(default_descriptors(), |var| config.upstream.url_for(var))?;
    let (recorder, recorder_handle) = UsageRecorder::spawn(stores.usage.clone(), (&config.recorder).into());

    let bind_address = config.bind_address();
    let app = build_router(AppState::new(config, stores, verifier, catalog, recorder));

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Draining usage recorder...");
    recorder_handle.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Human-readable logs by default, JSON lines with `LOG_FORMAT=json`
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "docgate_api=debug,docgate_pipeline=debug,docgate_shared=info,tower_http=debug".into()
    });
    let json = std::env::var("LOG_FORMAT").map_or(false, |format| format.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
