/// Metered operation endpoint
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/operations/:operation
/// Authorization: Bearer <signed token | ak_live_...>
/// Content-Type: application/json
///
/// { "req_id": "r-1", "doc_base64": "..." }
/// ```
///
/// # Responses
///
/// - API key callers get the upstream JSON object untouched (200, or 400 on
///   an upstream failure)
/// - Signed-token callers get
///   `{message, userId, remainingCredits, result, processedAt}` on success and
///   `{userMessage, technicalMessage, suggestion, code, upstream}` (400) on an
///   upstream failure
///
/// # Errors
///
/// - `400`: body is not JSON, validation failed or insufficient credits
/// - `401`: missing or invalid credential
/// - `404`: unknown operation
/// - `500`: billing failed after the upstream answered
/// - `502`: upstream unreachable (not charged)
/// - `503`: operation not configured (not charged)
///
/// The pipeline runs on its own task. If this handler is dropped (client
/// gone, request deadline hit) the drop guard cancels it: the upstream call is
/// aborted, nothing is charged, and a usage record is still written.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension, Json,
};
use docgate_pipeline::orchestrator::RequestMeta;
use docgate_shared::auth::middleware::AuthContext;
use serde_json::Value;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};

/// Runs a metered operation
pub async fn run_operation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(operation): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Response> {
    let meta = request_meta(&uri, &headers, connect_info.map(|ConnectInfo(addr)| addr));

    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            let err = state
                .orchestrator
                .reject_body(&auth, &operation, meta, rejection.body_text())
                .await;
            return Err(err.into());
        }
    };

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let orchestrator = state.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.execute(&auth, &operation, body, meta, cancel).await });

    let shaped = task
        .await
        .map_err(|e| ApiError::InternalError(format!("Operation task failed: {}", e)))??;

    let status = StatusCode::from_u16(shaped.status).unwrap_or(StatusCode::OK);
    Ok((status, Json(shaped.body)).into_response())
}

/// Request details for the usage record
pub(crate) fn request_meta(uri: &Uri, headers: &HeaderMap, peer: Option<SocketAddr>) -> RequestMeta {
    RequestMeta {
        endpoint: uri.path().to_string(),
        method: "POST".to_string(),
        ip_address: client_ip(headers, peer),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

/// First `X-Forwarded-For` hop, else the peer address
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}
