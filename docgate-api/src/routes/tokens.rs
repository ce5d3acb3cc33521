/// Redeemable credit token endpoints
///
/// # Endpoints
///
/// - `POST   /api/v1/tokens/generate` (admin)
/// - `POST   /api/v1/tokens/redeem` (signed token)
/// - `GET    /api/v1/tokens/{my-tokens,all,used,unused}` (admin)
/// - `DELETE /api/v1/tokens/:token_id` (admin, creator only, unused only)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use docgate_shared::{
    auth::middleware::AuthContext,
    models::credit_token::{CreditToken, TokenFilter},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{app::AppState, error::ApiResult};

/// Token generation request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTokenRequest {
    #[validate(range(min = 1, message = "Credits must be at least 1"))]
    pub credits: i64,

    #[validate(length(max = 200, message = "Description must be at most 200 characters"))]
    pub description: Option<String>,
}

/// Token generation response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTokenResponse {
    pub message: String,
    pub token: String,
    pub credits: i64,
    pub expires_at: DateTime<Utc>,
    pub description: Option<String>,
}

/// Redemption request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedeemTokenRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

/// Redemption response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemTokenResponse {
    pub message: String,
    pub credits: i64,
    pub remaining_credits: i64,
    pub used_at: DateTime<Utc>,
}

/// Token list response
#[derive(Debug, Serialize)]
pub struct TokenListResponse {
    pub message: String,
    pub tokens: Vec<CreditToken>,
    pub total: usize,
}

/// Message-only response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub async fn generate_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<GenerateTokenRequest>,
) -> ApiResult<(StatusCode, Json<GenerateTokenResponse>)> {
    req.validate()?;

    let description = req
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let token = state
        .tokens
        .generate(req.credits, description, &auth.identity.email)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(GenerateTokenResponse {
            message: "Token generated successfully".to_string(),
            token: token.code,
            credits: token.credits,
            expires_at: token.expires_at,
            description: token.description,
        }),
    ))
}

pub async fn redeem_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<RedeemTokenRequest>,
) -> ApiResult<Json<RedeemTokenResponse>> {
    req.validate()?;

    let account = state.accounts.ensure_account(&auth.identity).await?;
    let redemption = state.tokens.redeem(req.token.trim(), &account.user_id).await?;

    Ok(Json(RedeemTokenResponse {
        message: "Token redeemed successfully".to_string(),
        credits: redemption.credits,
        remaining_credits: redemption.remaining_credits,
        used_at: redemption.used_at,
    }))
}

pub async fn list_my_tokens(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<TokenListResponse>> {
    list(&state, TokenFilter::CreatedBy(auth.identity.email)).await
}

pub async fn list_all_tokens(State(state): State<AppState>) -> ApiResult<Json<TokenListResponse>> {
    list(&state, TokenFilter::All).await
}

pub async fn list_used_tokens(State(state): State<AppState>) -> ApiResult<Json<TokenListResponse>> {
    list(&state, TokenFilter::Used).await
}

pub async fn list_unused_tokens(State(state): State<AppState>) -> ApiResult<Json<TokenListResponse>> {
    list(&state, TokenFilter::Unused).await
}

async fn list(state: &AppState, filter: TokenFilter) -> ApiResult<Json<TokenListResponse>> {
    let tokens = state.tokens.list(filter).await?;

    Ok(Json(TokenListResponse {
        message: "Tokens retrieved successfully".to_string(),
        total: tokens.len(),
        tokens,
    }))
}

pub async fn delete_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(token_id): Path<Uuid>,
) -> ApiResult<Json<MessageResponse>> {
    state.tokens.delete(token_id, &auth.identity.email).await?;

    Ok(Json(MessageResponse {
        message: "Token deleted successfully".to_string(),
    }))
}
