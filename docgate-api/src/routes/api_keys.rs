/// API key management endpoints
///
/// Each account holds at most one key. Creating a key replaces the previous
/// one. All endpoints require a signed-in user token; API keys cannot manage
/// themselves.
///
/// # Endpoints
///
/// - `POST   /api/v1/api-keys` - Create (or replace) the key
/// - `GET    /api/v1/api-keys` - Current key, or `null`
/// - `GET    /api/v1/api-keys/list` - Keys as a list
/// - `PUT    /api/v1/api-keys` - Rename or (de)activate the key
/// - `DELETE /api/v1/api-keys` - Revoke the key
/// - `GET    /api/v1/api-keys/stats` - Usage summary
/// - `POST   /api/v1/validate/api-key` - Check a key without using it

use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::{DateTime, Duration, Utc};
use docgate_shared::{
    auth::{
        api_key::{display_prefix, generate_api_key, hash_api_key, validate_api_key_format, verify_api_key},
        middleware::AuthContext,
    },
    models::api_key::{ApiKey, ApiKeyStats, CreateApiKey, UpdateApiKey},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::{
    app::AppState,
    error::{ApiError, ApiResult, ValidationErrorDetail},
};

/// Longest allowed key lifetime
const MAX_KEY_LIFETIME_DAYS: i64 = 365;

/// Create API key request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 50, message = "Key name must be 1-50 characters"))]
    pub key_name: String,

    /// Optional expiry, in the future and at most one year ahead
    pub expires_at: Option<DateTime<Utc>>,
}

/// Create API key response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyResponse {
    pub message: String,

    /// The plaintext API key (ONLY returned on creation)
    pub api_key: String,

    pub key_name: String,

    pub key_prefix: String,

    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// Update API key request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApiKeyRequest {
    #[validate(length(min = 1, max = 50, message = "Key name must be 1-50 characters"))]
    pub key_name: Option<String>,

    pub is_active: Option<bool>,
}

/// Validate API key request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateApiKeyRequest {
    pub api_key: String,
}

/// Validation outcome
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateApiKeyResponse {
    pub valid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Single key response
#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub message: String,
    pub key: Option<ApiKey>,
}

/// Key list response
#[derive(Debug, Serialize)]
pub struct ListApiKeysResponse {
    pub message: String,
    pub keys: Vec<ApiKey>,
    pub total: usize,
}

/// Revocation response
#[derive(Debug, Serialize)]
pub struct RevokeApiKeyResponse {
    pub message: String,
}

/// Creates the caller's API key
///
/// # Response (201)
///
/// ```json
/// {
///   "message": "API key created successfully",
///   "apiKey": "ak_live_3f9c...",
///   "keyName": "CI server",
///   "keyPrefix": "ak_live_3f9c01ab",
///   "expiresAt": null,
///   "createdAt": "2025-01-03T12:00:00Z"
/// }
/// ```
pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateApiKeyRequest>,
) -> ApiResult<(StatusCode, Json<CreateApiKeyResponse>)> {
    req.validate()?;

    if let Some(expires_at) = req.expires_at {
        let now = Utc::now();
        if expires_at <= now {
            return Err(ApiError::ValidationError(vec![ValidationErrorDetail::new(
                "expiresAt",
                "Expiry must be in the future",
            )]));
        }
        if expires_at > now + Duration::days(MAX_KEY_LIFETIME_DAYS) {
            return Err(ApiError::ValidationError(vec![ValidationErrorDetail::new(
                "expiresAt",
                "Expiry must be within one year",
            )]));
        }
    }

    let account = state.accounts.ensure_account(&auth.identity).await?;
    let (plaintext_key, key_hash) = generate_api_key();

    let api_key = state
        .stores
        .keys
        .create(CreateApiKey {
            user_id: account.user_id.clone(),
            email: account.email.clone(),
            key_name: req.key_name.trim().to_string(),
            key_hash,
            key_prefix: display_prefix(&plaintext_key),
            expires_at: req.expires_at,
        })
        .await?;

    info!(user_id = %account.user_id, key_prefix = %api_key.key_prefix, "Created API key");

    Ok((
        StatusCode::CREATED,
        Json(CreateApiKeyResponse {
            message: "API key created successfully".to_string(),
            api_key: plaintext_key,
            key_name: api_key.key_name,
            key_prefix: api_key.key_prefix,
            expires_at: api_key.expires_at,
            created_at: api_key.created_at,
        }),
    ))
}

/// Returns the caller's key, or `null`
pub async fn get_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ApiKeyResponse>> {
    let account = state.accounts.ensure_account(&auth.identity).await?;
    let key = state.stores.keys.get_for_account(&account.user_id).await?;

    let message = if key.is_some() {
        "API key retrieved successfully"
    } else {
        "No API key found"
    };

    Ok(Json(ApiKeyResponse {
        message: message.to_string(),
        key,
    }))
}

/// Returns the caller's key as a list (zero or one entries)
pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ListApiKeysResponse>> {
    let account = state.accounts.ensure_account(&auth.identity).await?;
    let keys: Vec<ApiKey> = state
        .stores
        .keys
        .get_for_account(&account.user_id)
        .await?
        .into_iter()
        .collect();

    Ok(Json(ListApiKeysResponse {
        message: "API keys retrieved successfully".to_string(),
        total: keys.len(),
        keys,
    }))
}

/// Renames or (de)activates the caller's key
pub async fn update_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<UpdateApiKeyRequest>,
) -> ApiResult<Json<ApiKeyResponse>> {
    req.validate()?;

    if req.key_name.is_none() && req.is_active.is_none() {
        return Err(ApiError::ValidationError(vec![ValidationErrorDetail::new(
            "body",
            "Provide keyName or isActive",
        )]));
    }

    let account = state.accounts.ensure_account(&auth.identity).await?;
    let key = state
        .stores
        .keys
        .update_for_account(
            &account.user_id,
            UpdateApiKey {
                key_name: req.key_name.map(|name| name.trim().to_string()),
                is_active: req.is_active,
            },
        )
        .await?
        .ok_or_else(|| ApiError::NotFound("No API key found".to_string()))?;

    info!(user_id = %account.user_id, is_active = key.is_active, "Updated API key");

    Ok(Json(ApiKeyResponse {
        message: "API key updated successfully".to_string(),
        key: Some(key),
    }))
}

/// Revokes (deletes) the caller's key
pub async fn revoke_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<RevokeApiKeyResponse>> {
    let account = state.accounts.ensure_account(&auth.identity).await?;
    let removed = state.stores.keys.revoke_all_for_account(&account.user_id).await?;

    if removed == 0 {
        return Err(ApiError::NotFound("No API key found".to_string()));
    }

    info!(user_id = %account.user_id, "Revoked API key");

    Ok(Json(RevokeApiKeyResponse {
        message: "API key revoked successfully".to_string(),
    }))
}

/// Usage summary of the caller's keys
pub async fn api_key_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ApiKeyStats>> {
    let account = state.accounts.ensure_account(&auth.identity).await?;
    let key = state.stores.keys.get_for_account(&account.user_id).await?;

    Ok(Json(ApiKeyStats::from_keys(key.iter())))
}

/// Checks a key's format and status without counting a use
pub async fn validate_api_key(
    State(state): State<AppState>,
    Json(req): Json<ValidateApiKeyRequest>,
) -> ApiResult<Json<ValidateApiKeyResponse>> {
    let candidate = req.api_key.trim();

    if !validate_api_key_format(candidate) {
        return Ok(Json(ValidateApiKeyResponse {
            reason: Some("invalid format".to_string()),
            ..Default::default()
        }));
    }

    let stored = state
        .stores
        .keys
        .get_by_hash(&hash_api_key(candidate))
        .await?
        .filter(|key| verify_api_key(candidate, &key.key_hash));

    let response = match stored {
        None => ValidateApiKeyResponse {
            reason: Some("not found".to_string()),
            ..Default::default()
        },
        Some(key) => {
            let reason = if !key.is_active {
                Some("inactive".to_string())
            } else if key.is_expired() {
                Some("expired".to_string())
            } else {
                None
            };

            ValidateApiKeyResponse {
                valid: key.is_usable(),
                key_prefix: Some(key.key_prefix),
                is_active: Some(key.is_active),
                expires_at: key.expires_at,
                reason,
            }
        }
    };

    Ok(Json(response))
}
