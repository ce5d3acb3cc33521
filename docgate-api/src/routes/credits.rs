/// Credit balance endpoints
///
/// # Endpoints
///
/// - `GET /api/v1/credits/balance` (signed token): caller's balance,
///   provisioning the account on first contact
/// - `POST /api/v1/credits/deduct` (signed token): debit the caller, or any
///   account for admins
/// - `POST /api/v1/credits/add` (admin): top up an account

use axum::{extract::State, Extension, Json};
use docgate_shared::auth::middleware::AuthContext;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};

/// Balance response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user_id: String,
    pub email: String,
    pub credits: i64,
}

/// Deduction request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeductCreditsRequest {
    /// Target account; defaults to the caller
    pub user_id: Option<String>,

    #[validate(range(min = 1, message = "Amount must be at least 1"))]
    pub amount: i64,
}

/// Top-up request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddCreditsRequest {
    #[validate(length(min = 1, message = "User id is required"))]
    pub user_id: String,

    #[validate(range(min = 1, message = "Amount must be at least 1"))]
    pub amount: i64,
}

/// Balance after a credit movement
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsResponse {
    pub user_id: String,
    pub credits: i64,
}

pub async fn get_balance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<BalanceResponse>> {
    let account = state.accounts.ensure_account(&auth.identity).await?;

    Ok(Json(BalanceResponse {
        user_id: account.user_id,
        email: account.email,
        credits: account.balance,
    }))
}

pub async fn deduct_credits(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<DeductCreditsRequest>,
) -> ApiResult<Json<CreditsResponse>> {
    req.validate()?;

    let own = state.accounts.ensure_account(&auth.identity).await?;
    let target = match req.user_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        Some(user_id) if user_id != own.user_id => {
            if !auth.identity.is_admin {
                return Err(ApiError::Forbidden("You can only deduct your own credits".to_string()));
            }
            user_id.to_string()
        }
        _ => own.user_id,
    };

    let credits = state.ledger.debit(&target, req.amount).await?;
    info!(user_id = %target, amount = req.amount, by = %auth.identity.email, "Deducted credits");

    Ok(Json(CreditsResponse {
        user_id: target,
        credits,
    }))
}

pub async fn add_credits(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<AddCreditsRequest>,
) -> ApiResult<Json<CreditsResponse>> {
    req.validate()?;

    let user_id = req.user_id.trim().to_string();
    let credits = state.ledger.credit(&user_id, req.amount).await?;
    info!(user_id = %user_id, amount = req.amount, by = %auth.identity.email, "Added credits");

    Ok(Json(CreditsResponse { user_id, credits }))
}
