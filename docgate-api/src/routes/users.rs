/// Account registration
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/register
/// Content-Type: application/json
///
/// { "userId": "alice", "email": "alice@example.com" }
/// ```
///
/// # Response (201)
///
/// ```json
/// {
///   "message": "User registered successfully",
///   "userId": "alice",
///   "email": "alice@example.com",
///   "credits": 10
/// }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Validation failed
/// - `409 Conflict`: User id or email already registered

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{app::AppState, error::ApiResult};

/// Registration request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 128, message = "User id must be 1-128 characters"))]
    pub user_id: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

/// Registration response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub message: String,
    pub user_id: String,
    pub email: String,
    pub credits: i64,
}

/// Registers an account with the starting grant
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    req.validate()?;

    let account = state
        .accounts
        .register(req.user_id.trim(), req.email.trim())
        .await?;

    tracing::info!(user_id = %account.user_id, "Registered account");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            user_id: account.user_id,
            email: account.email,
            credits: account.balance,
        }),
    ))
}
