/// Error handling for the API server
///
/// This module provides a unified error type that maps to HTTP responses.
/// All handlers return `Result<T, ApiError>`; errors from the shared crate
/// and the pipeline convert into it with `?`.
///
/// # Response Format
///
/// ```json
/// {
///   "error": "insufficient_credits",
///   "message": "Insufficient credits: required 2, available 1",
///   "details": [ { "field": "...", "message": "..." } ]
/// }
/// ```
///
/// # Example
///
/// ```
/// use docgate_api::error::{ApiError, ApiResult};
/// use axum::Json;
/// use serde_json::json;
///
/// async fn handler(amount: i64) -> ApiResult<Json<serde_json::Value>> {
///     if amount < 1 {
///         return Err(ApiError::BadRequest("amount must be positive".to_string()));
///     }
///     Ok(Json(json!({ "amount": amount })))
/// }
/// ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::ValidationErrors;

use docgate_pipeline::catalog::FieldViolation;
use docgate_pipeline::orchestrator::PipelineError;
use docgate_shared::accounts::AccountError;
use docgate_shared::auth::middleware::AuthError;
use docgate_shared::credit_tokens::TokenError;
use docgate_shared::ledger::LedgerError;
use docgate_shared::store::StoreError;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Request validation failed (400)
    ValidationError(Vec<ValidationErrorDetail>),

    /// Balance does not cover the operation (400)
    InsufficientCredits { required: i64, available: i64 },

    /// Unauthorized (401)
    Unauthorized(String),

    /// Forbidden (403)
    Forbidden(String),

    /// Not found (404)
    NotFound(String),

    /// Request deadline passed or request cancelled (408)
    RequestTimeout(String),

    /// Conflict (409), e.g. duplicate account
    Conflict(String),

    /// Internal server error (500)
    InternalError(String),

    /// Upstream answered but the debit failed (500)
    SettlementFailed,

    /// Upstream unreachable or unparseable (502)
    BadGateway(String),

    /// Service unavailable (503)
    ServiceUnavailable(String),
}

/// Validation error detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

impl ValidationErrorDetail {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "bad_request", "unauthorized")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Optional validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::InsufficientCredits { required, available } => {
                write!(f, "Insufficient credits: required {}, available {}", required, available)
            }
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::RequestTimeout(msg) => write!(f, "Request timeout: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::SettlementFailed => write!(f, "Operation completed but billing failed"),
            ApiError::BadGateway(msg) => write!(f, "Bad gateway: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::ValidationError(errors) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                "Request validation failed".to_string(),
                Some(errors),
            ),
            ApiError::InsufficientCredits { required, available } => (
                StatusCode::BAD_REQUEST,
                "insufficient_credits",
                format!("Insufficient credits: required {}, available {}", required, available),
                None,
            ),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::RequestTimeout(msg) => (StatusCode::REQUEST_TIMEOUT, "request_timeout", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),
            ApiError::InternalError(msg) => {
                // Log internal errors but don't expose details to clients
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::SettlementFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "settlement_failed",
                "Operation completed but billing failed".to_string(),
                None,
            ),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "upstream_unavailable", msg, None),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg, None),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

/// Convert derive-validation failures to API errors
impl From<ValidationErrors> for ApiError {
    fn from(err: ValidationErrors) -> Self {
        let mut errors: Vec<ValidationErrorDetail> = err
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| ValidationErrorDetail {
                    field: field.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Validation failed".to_string()),
                })
            })
            .collect();
        errors.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::ValidationError(errors)
    }
}

/// Convert sqlx errors to API errors
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                // Check for unique constraint violations
                if let Some(constraint) = db_err.constraint() {
                    return ApiError::Conflict(format!("Constraint violation: {}", constraint));
                }

                ApiError::InternalError(format!("Database error: {}", db_err))
            }
            _ => ApiError::InternalError(format!("Database error: {}", err)),
        }
    }
}

/// Convert store errors to API errors
impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound("Resource not found".to_string()),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Database(e) => e.into(),
            StoreError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

/// Convert auth errors to API errors
impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredential | AuthError::MalformedCredential | AuthError::InvalidCredential(_) => {
                ApiError::Unauthorized(err.to_string())
            }
            AuthError::Forbidden(msg) => ApiError::Forbidden(msg),
            AuthError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

/// Convert ledger errors to API errors
impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(user_id) => ApiError::NotFound(format!("Account not found: {}", user_id)),
            LedgerError::InsufficientCredits { required, available } => {
                ApiError::InsufficientCredits { required, available }
            }
            LedgerError::InvalidAmount(amount) => ApiError::ValidationError(vec![ValidationErrorDetail::new(
                "amount",
                format!("amount must be positive, got {}", amount),
            )]),
            LedgerError::Store(e) => e.into(),
        }
    }
}

/// Convert account errors to API errors
impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::AlreadyExists(user_id) => ApiError::Conflict(format!("Account already exists: {}", user_id)),
            AccountError::Store(e) => e.into(),
        }
    }
}

/// Convert credit token errors to API errors
impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::NotFound => ApiError::NotFound("Token not found".to_string()),
            TokenError::AlreadyUsed | TokenError::Expired | TokenError::UsedTokenNotDeletable => {
                ApiError::BadRequest(err.to_string())
            }
            TokenError::InvalidCredits(_) => {
                ApiError::ValidationError(vec![ValidationErrorDetail::new("credits", err.to_string())])
            }
            TokenError::NotCreator => ApiError::Forbidden(err.to_string()),
            TokenError::Store(e) => e.into(),
            TokenError::Ledger(e) => e.into(),
        }
    }
}

impl From<FieldViolation> for ValidationErrorDetail {
    fn from(violation: FieldViolation) -> Self {
        Self {
            field: violation.field,
            message: violation.message,
        }
    }
}

/// Convert pipeline exits to API errors
impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(violations) => {
                ApiError::ValidationError(violations.into_iter().map(Into::into).collect())
            }
            PipelineError::UnknownOperation(name) => ApiError::NotFound(format!("Unknown operation: {}", name)),
            PipelineError::InsufficientCredits { required, available } => {
                ApiError::InsufficientCredits { required, available }
            }
            PipelineError::MalformedBody(reason) => ApiError::BadRequest(reason),
            PipelineError::UpstreamUnavailable(_) => {
                ApiError::BadGateway("Upstream service unavailable, you were not charged".to_string())
            }
            PipelineError::Cancelled => ApiError::RequestTimeout("Request was cancelled".to_string()),
            PipelineError::OperationUnavailable(name) => {
                ApiError::ServiceUnavailable(format!("Operation {} is not configured", name))
            }
            PipelineError::Settlement(_) => ApiError::SettlementFailed,
            PipelineError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}
