/// Application state and router builder
///
/// This module defines the shared application state and builds the Axum
/// router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use docgate_api::{app::{build_router, AppState}, config::Config};
/// use docgate_pipeline::catalog::{default_descriptors, Catalog};
/// use docgate_pipeline::recorder::{RecorderConfig, UsageRecorder};
/// use docgate_shared::auth::jwks::{HttpKeySetSource, KeySetCache};
/// use docgate_shared::auth::jwt::SignedTokenVerifier;
/// use docgate_shared::store::Stores;
/// use std::sync::Arc;
///
/// # async fn example(pool: sqlx::PgPool) -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let stores = Stores::postgres(pool);
///
/// let source = HttpKeySetSource::new(config.auth.jwks_uri.clone())?;
/// let keys = KeySetCache::new(Arc::new(source), config.jwks_cache_ttl());
/// let verifier = Arc::new(SignedTokenVerifier::new(config.auth.issuer_url.clone(), keys));
///
/// let catalog = Catalog::from_upstreams(default_descriptors(), |var| config.upstream.url_for(var))?;
/// let (recorder, _handle) = UsageRecorder::spawn(stores.usage.clone(), RecorderConfig::default());
///
/// let app = build_router(AppState::new(config, stores, verifier, catalog, recorder));
/// # Ok(())
/// # }
/// ```

use crate::{config::Config, middleware::security::SecurityHeadersLayer};
use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use docgate_pipeline::{
    catalog::Catalog,
    orchestrator::MeteredOperationOrchestrator,
    recorder::UsageRecorder,
    translator::ErrorTranslator,
};
use docgate_shared::{
    accounts::AccountService,
    auth::{jwt::SignedTokenVerifier, middleware::IdentityResolver},
    credit_tokens::TokenService,
    ledger::CreditLedger,
    store::Stores,
};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
/// Every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,

    /// Persistence handles
    pub stores: Stores,

    /// Credential resolution for the auth layers
    pub resolver: IdentityResolver,

    pub ledger: CreditLedger,

    pub accounts: AccountService,

    pub tokens: TokenService,

    /// Metered operation pipeline
    pub orchestrator: MeteredOperationOrchestrator,
}

impl AppState {
    /// Wires the services over the given stores
    pub fn new(
        config: Config,
        stores: Stores,
        verifier: Arc<SignedTokenVerifier>,
        catalog: Catalog,
        recorder: UsageRecorder,
    ) -> Self {
        let ledger = CreditLedger::new(stores.accounts.clone());
        let accounts = AccountService::new(stores.accounts.clone(), config.billing.starting_credits);
        let tokens = TokenService::new(stores.tokens.clone(), ledger.clone());
        let resolver = IdentityResolver::new(stores.keys.clone(), verifier);

        let orchestrator = MeteredOperationOrchestrator::new(
            Arc::new(catalog),
            accounts.clone(),
            ledger.clone(),
            recorder,
            Arc::new(ErrorTranslator::new()),
        );

        Self {
            config: Arc::new(config),
            stores,
            resolver,
            ledger,
            accounts,
            tokens,
            orchestrator,
        }
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── /health                              # public
/// └── /api/v1/
///     ├── POST /register                   # public
///     ├── POST /operations/:operation      # API key or signed token
///     ├── /credits/{balance,deduct}        # signed token
///     ├── /credits/add                     # admin
///     ├── /api-keys[/list,/stats]          # signed token
///     ├── /validate/api-key                # signed token
///     ├── /tokens/redeem                   # signed token
///     ├── /tokens/{generate,my-tokens,all,used,unused,:token_id}   # admin
///     ├── /usage/me                        # signed token
///     └── /usage/...                       # admin
/// ```
///
/// # Middleware Stack
///
/// Applied outermost first:
/// 1. Security headers
/// 2. CORS
/// 3. Logging (tower-http TraceLayer)
/// 4. Request timeout
/// 5. Authentication (per route group)
pub fn build_router(state: AppState) -> Router {
    use crate::middleware::auth::{admin_layer, operation_auth_layer, signed_token_layer};
    use crate::routes;

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let public_routes = Router::new().route("/register", post(routes::users::register));

    let operation_routes = Router::new()
        .route("/operations/:operation", post(routes::operations::run_operation))
        .layer(from_fn_with_state(state.clone(), operation_auth_layer));

    let signed_routes = Router::new()
        .route("/credits/balance", get(routes::credits::get_balance))
        .route("/credits/deduct", post(routes::credits::deduct_credits))
        .route(
            "/api-keys",
            post(routes::api_keys::create_api_key)
                .get(routes::api_keys::get_api_key)
                .put(routes::api_keys::update_api_key)
                .delete(routes::api_keys::revoke_api_key),
        )
        .route("/api-keys/list", get(routes::api_keys::list_api_keys))
        .route("/api-keys/stats", get(routes::api_keys::api_key_stats))
        .route("/validate/api-key", post(routes::api_keys::validate_api_key))
        .route("/tokens/redeem", post(routes::tokens::redeem_token))
        .route("/usage/me", get(routes::usage::my_history))
        .layer(from_fn_with_state(state.clone(), signed_token_layer));

    let admin_routes = Router::new()
        .route("/credits/add", post(routes::credits::add_credits))
        .route("/tokens/generate", post(routes::tokens::generate_token))
        .route("/tokens/my-tokens", get(routes::tokens::list_my_tokens))
        .route("/tokens/all", get(routes::tokens::list_all_tokens))
        .route("/tokens/used", get(routes::tokens::list_used_tokens))
        .route("/tokens/unused", get(routes::tokens::list_unused_tokens))
        .route("/tokens/:token_id", delete(routes::tokens::delete_token))
        .route("/usage/services", get(routes::usage::service_stats))
        .route("/usage/users", get(routes::usage::user_stats))
        .route("/usage/service-users", get(routes::usage::service_user_stats))
        .route("/usage/users/:user_id/history", get(routes::usage::user_history))
        .route("/usage/services/:service/history", get(routes::usage::service_history))
        .layer(from_fn_with_state(state.clone(), admin_layer));

    let v1_routes = Router::new()
        .merge(public_routes)
        .merge(operation_routes)
        .merge(signed_routes)
        .merge(admin_routes);

    // Configure CORS based on environment
    let cors = if state.config.api.cors_origins.iter().any(|origin| origin == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    let request_timeout = state.config.request_timeout();

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", v1_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}
