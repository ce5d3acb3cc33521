/// Authentication middleware layers
///
/// Each layer resolves the `Authorization` header through the shared
/// [`IdentityResolver`] and injects the resulting `AuthContext` into request
/// extensions, where handlers pick it up with `Extension<AuthContext>`.
///
/// | Layer | Accepts | Used by |
/// |---|---|---|
/// | [`operation_auth_layer`] | API key or signed token | metered operations |
/// | [`signed_token_layer`] | signed token | account management |
/// | [`admin_layer`] | signed token with the admin role | credits, tokens, analytics |
///
/// Authentication failures are answered before any handler runs and never
/// reach the ledger. On operation routes they still leave a 0-credit usage
/// record filed under the `unknown` caller.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use docgate_shared::auth::middleware::{AuthContext, AuthError, AuthMethod, CredentialPolicy, IdentityResolver};
use std::net::SocketAddr;
use tracing::debug;

use crate::{app::AppState, error::ApiError, routes::operations::request_meta};

/// Accepts API keys and signed tokens
pub async fn operation_auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = authorization(&req);
    let path = req.uri().path().to_string();

    let auth_context = match resolve(&state, &path, header.as_deref(), CredentialPolicy::Either, false).await {
        Ok(auth_context) => auth_context,
        Err(e) => {
            let operation = path.rsplit('/').next().unwrap_or_default();
            let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| *addr);
            let meta = request_meta(req.uri(), req.headers(), peer);

            state
                .orchestrator
                .record_auth_failure(operation, AuthMethod::of_header(header.as_deref()), meta, &e.to_string());
            return Err(e.into());
        }
    };

    req.extensions_mut().insert::<AuthContext>(auth_context);
    Ok(next.run(req).await)
}

/// Accepts signed tokens only
pub async fn signed_token_layer(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authenticate(&state, req, next, false).await
}

/// Accepts signed tokens carrying the admin role
pub async fn admin_layer(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authenticate(&state, req, next, true).await
}

async fn authenticate(state: &AppState, mut req: Request, next: Next, require_admin: bool) -> Result<Response, ApiError> {
    let header = authorization(&req);
    let path = req.uri().path().to_string();
    let auth_context = resolve(state, &path, header.as_deref(), CredentialPolicy::SignedTokenOnly, require_admin).await?;

    req.extensions_mut().insert::<AuthContext>(auth_context);
    Ok(next.run(req).await)
}

fn authorization(req: &Request) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn resolve(
    state: &AppState,
    path: &str,
    header: Option<&str>,
    policy: CredentialPolicy,
    require_admin: bool,
) -> Result<AuthContext, AuthError> {
    let auth_context = state.resolver.resolve(header, policy).await.map_err(|e| {
        debug!(path, error = %e, "Authentication failed");
        e
    })?;

    if require_admin {
        IdentityResolver::require_admin(&auth_context).map_err(|e| {
            debug!(path, email = %auth_context.identity.email, "Admin role required");
            e
        })?;
    }

    Ok(auth_context)
}
