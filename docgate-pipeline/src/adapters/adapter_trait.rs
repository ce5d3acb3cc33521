/// External operation contract
///
/// Every metered operation is backed by an upstream document-processing
/// service. The orchestrator talks to it only through [`ExternalOperation`],
/// so the HTTP client, test doubles and any future transport are
/// interchangeable.
///
/// # Upstream Contract
///
/// ```text
/// request:  {"req_id": "...", <payload fields>}
/// response: {"req_id": "...", "success": true|false, "error_message": "...", <result fields>}
/// ```
///
/// A response that is not a JSON object, or that has no boolean `success`,
/// is treated like a transport failure: nothing is charged for it.
///
/// # Example
///
/// ```no_run
/// use docgate_pipeline::adapters::{ExternalOperation, OperationError, OperationRequest, UpstreamResult};
/// use async_trait::async_trait;
///
/// struct Echo;
///
/// #[async_trait]
/// impl ExternalOperation for Echo {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     async fn invoke(&self, request: OperationRequest) -> Result<UpstreamResult, OperationError> {
///         UpstreamResult::from_body(serde_json::json!({
///             "req_id": request.req_id,
///             "success": true,
///         }))
///     }
/// }
/// ```

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// Why an upstream call produced no structured response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// Connection, TLS or HTTP-level failure
    #[error("Upstream transport error: {0}")]
    Transport(String),

    /// Call exceeded its time budget
    #[error("Upstream call timed out after {0:?}")]
    Timeout(Duration),

    /// Body was not a structured upstream response
    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    /// Request was cancelled before the upstream answered
    #[error("Request was cancelled")]
    Cancelled,
}

/// Validated request forwarded upstream
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    /// Caller-supplied correlation id
    pub req_id: String,

    /// Full validated body, including `req_id`
    pub body: Map<String, Value>,
}

impl OperationRequest {
    pub fn new(req_id: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            req_id: req_id.into(),
            body,
        }
    }

    /// JSON body sent to the upstream
    pub fn to_json(&self) -> Value {
        Value::Object(self.body.clone())
    }
}

/// Structured upstream response
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResult {
    pub req_id: Option<String>,

    /// Semantic outcome reported by the upstream
    pub success: bool,

    pub error_message: Option<String>,

    /// Untouched upstream object (field order preserved)
    pub raw: Value,
}

impl UpstreamResult {
    /// Parses an upstream body
    ///
    /// # Errors
    ///
    /// `InvalidResponse` when the body is not an object or lacks a boolean
    /// `success` field
    pub fn from_body(raw: Value) -> Result<Self, OperationError> {
        let object = raw
            .as_object()
            .ok_or_else(|| OperationError::InvalidResponse("body is not a JSON object".to_string()))?;

        let success = object
            .get("success")
            .and_then(Value::as_bool)
            .ok_or_else(|| OperationError::InvalidResponse("missing boolean 'success' field".to_string()))?;

        let req_id = object.get("req_id").and_then(Value::as_str).map(str::to_string);

        let error_message = object
            .get("error_message")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .map(str::to_string);

        Ok(Self {
            req_id,
            success,
            error_message,
            raw,
        })
    }

    /// Failure text used for translation and usage records
    pub fn failure_message(&self) -> &str {
        self.error_message.as_deref().unwrap_or("processing failed")
    }
}

/// Upstream document-processing operation
#[async_trait]
pub trait ExternalOperation: Send + Sync {
    /// Route name of the operation
    fn name(&self) -> &str;

    /// Performs one upstream call
    ///
    /// Implementations do not retry; the orchestrator applies the time
    /// budget and cancellation.
    async fn invoke(&self, request: OperationRequest) -> Result<UpstreamResult, OperationError>;
}
