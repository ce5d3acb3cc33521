/// Metered operation orchestrator
///
/// Runs one metered request from an authenticated caller to a shaped response.
/// Every operation goes through the same linear pipeline; only the catalog
/// descriptor and the adapter differ.
///
/// # Pipeline
///
/// ```text
/// Authenticated            (401 recorded through record_auth_failure)
///   ├─> BodyParsed         (400 recorded through reject_body)
///   ├─> BodyValidated      (400, nothing charged)
///   ├─> AccountResolved    (auto-provisioned on first contact)
///   ├─> BalanceChecked     (400 insufficient credits)
///   ├─> UpstreamInvoked    (budget + cancellation; 502 / cancelled, nothing charged)
///   ├─> Settled            (debit per SettlementPolicy; 500 if billing fails)
///   ├─> UsageRecorded      (background, exactly one attempt per request)
///   └─> ResponseShaped     (raw for API keys, enriched for signed tokens)
/// ```
///
/// # Example
///
/// ```no_run
/// use docgate_pipeline::orchestrator::{MeteredOperationOrchestrator, RequestMeta};
/// use docgate_shared::auth::middleware::AuthContext;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(orchestrator: MeteredOperationOrchestrator, auth: AuthContext) {
/// let body = serde_json::json!({"req_id": "r-1", "base64_str": "aGVsbG8gd29ybGQ="});
/// let meta = RequestMeta::new("/api/v1/operations/qr-masking", "POST");
///
/// match orchestrator.execute(&auth, "qr-masking", body, meta, CancellationToken::new()).await {
///     Ok(response) => println!("{} {}", response.status, response.body),
///     Err(e) => eprintln!("failed with {}: {}", e.status_code(), e),
/// }
/// # }
/// ```

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use docgate_shared::accounts::{AccountError, AccountService};
use docgate_shared::auth::middleware::{AuthContext, AuthMethod, Identity};
use docgate_shared::ledger::{CreditLedger, LedgerError, UpstreamOutcome};
use docgate_shared::models::account::Account;
use docgate_shared::models::usage::NewUsageRecord;

use crate::adapters::{OperationError, OperationRequest, UpstreamResult};
use crate::catalog::{Catalog, FieldViolation, OperationDescriptor};
use crate::recorder::UsageRecorder;
use crate::timeout::run_with_budget;
use crate::translator::ErrorTranslator;

/// User id and email on records for callers that never authenticated
pub const UNKNOWN_CALLER: &str = "unknown";

/// Auth method tag for requests without a credential
const NO_CREDENTIAL: &str = "none";

/// Error type for the pipeline's failure exits
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("Request body could not be parsed: {0}")]
    MalformedBody(String),

    #[error("Request validation failed")]
    Validation(Vec<FieldViolation>),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Operation not configured: {0}")]
    OperationUnavailable(String),

    /// Upstream answered but the debit failed
    #[error("Operation completed but billing failed")]
    Settlement(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// HTTP status for this exit
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::MalformedBody(_)
            | PipelineError::Validation(_)
            | PipelineError::InsufficientCredits { .. } => 400,
            PipelineError::UnknownOperation(_) => 404,
            PipelineError::UpstreamUnavailable(_) => 502,
            PipelineError::OperationUnavailable(_) => 503,
            // Nobody is listening for a cancelled request
            PipelineError::Cancelled => 499,
            PipelineError::Settlement(_) | PipelineError::Internal(_) => 500,
        }
    }
}

impl From<AccountError> for PipelineError {
    fn from(err: AccountError) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

/// Request details copied onto the usage record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub endpoint: String,
    pub method: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    pub fn new(endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            ..Default::default()
        }
    }
}

/// Status and JSON body ready for the HTTP layer
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedResponse {
    pub status: u16,
    pub body: Value,
}

/// What one request produced, before it is written down
struct Settlement {
    success: bool,
    error_message: Option<String>,
    credits_charged: i64,
}

impl Settlement {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            credits_charged: 0,
        }
    }
}

/// Per-request bookkeeping for the usage record
struct RequestScope<'a> {
    descriptor: &'a OperationDescriptor,
    email: String,
    auth_method: &'static str,
    meta: RequestMeta,
    request_id: Option<String>,
    started: Instant,
}

impl<'a> RequestScope<'a> {
    fn new(auth: &AuthContext, descriptor: &'a OperationDescriptor, meta: RequestMeta, request_id: Option<String>) -> Self {
        Self {
            descriptor,
            email: auth.identity.email.clone(),
            auth_method: auth.method.as_str(),
            meta,
            request_id,
            started: Instant::now(),
        }
    }
}

/// Account id to file a record under when the account was never resolved
fn provisional_user_id(identity: &Identity) -> String {
    identity
        .account_id
        .clone()
        .unwrap_or_else(|| identity.email.clone())
}

/// Composes identity, ledger, recorder and translator around the catalog
#[derive(Clone)]
pub struct MeteredOperationOrchestrator {
    catalog: Arc<Catalog>,
    accounts: AccountService,
    ledger: CreditLedger,
    recorder: UsageRecorder,
    translator: Arc<ErrorTranslator>,
}

impl MeteredOperationOrchestrator {
    pub fn new(
        catalog: Arc<Catalog>,
        accounts: AccountService,
        ledger: CreditLedger,
        recorder: UsageRecorder,
        translator: Arc<ErrorTranslator>,
    ) -> Self {
        Self {
            catalog,
            accounts,
            ledger,
            recorder,
            translator,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Records a request refused by authentication
    ///
    /// The row carries `user_id = email = "unknown"` and the credential's
    /// shape as its auth method. Nothing is written for operation names
    /// outside the catalog.
    pub fn record_auth_failure(&self, operation: &str, method: Option<AuthMethod>, meta: RequestMeta, reason: &str) {
        let Some(descriptor) = self.catalog.descriptor(operation) else {
            return;
        };

        let scope = RequestScope {
            descriptor,
            email: UNKNOWN_CALLER.to_string(),
            auth_method: method.map_or(NO_CREDENTIAL, |m| m.as_str()),
            meta,
            request_id: None,
            started: Instant::now(),
        };
        self.record(&scope, UNKNOWN_CALLER, Settlement::failed(format!("authentication failed: {}", reason)));
    }

    /// Records and rejects a request whose body is not a JSON document
    pub async fn reject_body(&self, auth: &AuthContext, operation: &str, meta: RequestMeta, reason: String) -> PipelineError {
        let Some(descriptor) = self.catalog.descriptor(operation) else {
            return PipelineError::UnknownOperation(operation.to_string());
        };

        let scope = RequestScope::new(auth, descriptor, meta, None);
        let user_id = self.attributed_user_id(&auth.identity).await;
        debug!(operation, user_id = %user_id, "Request body parsing failed");
        self.record(&scope, &user_id, Settlement::failed("request body parsing failed"));

        PipelineError::MalformedBody(reason)
    }

    /// Runs one metered request
    ///
    /// Emits exactly one usage record for every outcome except an unknown
    /// operation name.
    ///
    /// # Errors
    ///
    /// Any [`PipelineError`] exit; `Ok` covers both upstream success and
    /// upstream semantic failure (status 400 in the shaped response).
    pub async fn execute(
        &self,
        auth: &AuthContext,
        operation: &str,
        body: Value,
        meta: RequestMeta,
        cancel: CancellationToken,
    ) -> Result<ShapedResponse, PipelineError> {
        let descriptor = self
            .catalog
            .descriptor(operation)
            .ok_or_else(|| PipelineError::UnknownOperation(operation.to_string()))?;

        let request_id = body.get("req_id").and_then(Value::as_str).map(str::to_string);
        let scope = RequestScope::new(auth, descriptor, meta, request_id);

        let payload = match descriptor.shape.validate(&body) {
            Ok(payload) => payload,
            Err(violations) => {
                let user_id = self.attributed_user_id(&auth.identity).await;
                debug!(operation, user_id = %user_id, violations = violations.len(), "Request validation failed");
                self.record(&scope, &user_id, Settlement::failed("request validation failed"));
                return Err(PipelineError::Validation(violations));
            }
        };

        let account = match self.accounts.ensure_account(&auth.identity).await {
            Ok(account) => account,
            Err(e) => {
                let user_id = provisional_user_id(&auth.identity);
                error!(operation, user_id = %user_id, error = %e, "Failed to resolve account");
                self.record(&scope, &user_id, Settlement::failed("account resolution failed"));
                return Err(e.into());
            }
        };

        let adapter = match self.catalog.operation(operation) {
            Some(adapter) => adapter,
            None => {
                warn!(operation, "Operation called without a configured upstream");
                self.record(&scope, &account.user_id, Settlement::failed("operation not configured"));
                return Err(PipelineError::OperationUnavailable(operation.to_string()));
            }
        };

        let cost = descriptor.policy.cost;
        if account.balance < cost {
            info!(
                operation,
                user_id = %account.user_id,
                required = cost,
                available = account.balance,
                "Insufficient credits"
            );
            self.record(&scope, &account.user_id, Settlement::failed("insufficient credits"));
            return Err(PipelineError::InsufficientCredits {
                required: cost,
                available: account.balance,
            });
        }

        let request = OperationRequest::new(scope.request_id.clone().unwrap_or_default(), payload);
        let result = run_with_budget(adapter.invoke(request), descriptor.timeout, &cancel).await;

        let upstream = match result {
            Ok(upstream) => upstream,
            Err(e) => {
                let settlement = Settlement::failed(e.to_string());
                self.record(&scope, &account.user_id, settlement);
                return Err(match e {
                    OperationError::Cancelled => {
                        info!(operation, user_id = %account.user_id, "Request cancelled before upstream answered");
                        PipelineError::Cancelled
                    }
                    other => {
                        warn!(operation, user_id = %account.user_id, error = %other, "Upstream unavailable");
                        PipelineError::UpstreamUnavailable(other.to_string())
                    }
                });
            }
        };

        let outcome = if upstream.success {
            UpstreamOutcome::Succeeded
        } else {
            UpstreamOutcome::SemanticFailure
        };
        let amount = descriptor.policy.amount_due(outcome);

        let remaining = match self.settle(&account, amount).await {
            Ok(remaining) => remaining,
            Err(e) => {
                error!(
                    operation,
                    user_id = %account.user_id,
                    amount,
                    error = %e,
                    "Operation completed but billing failed"
                );
                self.record(&scope, &account.user_id, Settlement::failed("billing failed"));
                return Err(PipelineError::Settlement(e.to_string()));
            }
        };

        let error_message = (!upstream.success).then(|| upstream.failure_message().to_string());
        self.record(
            &scope,
            &account.user_id,
            Settlement {
                success: upstream.success || descriptor.policy.charge_on_upstream_response,
                error_message,
                credits_charged: amount,
            },
        );

        info!(
            operation,
            user_id = %account.user_id,
            upstream_success = upstream.success,
            credits_charged = amount,
            remaining_credits = remaining,
            "Operation completed"
        );

        Ok(self.shape(auth.method, &account.user_id, remaining, upstream))
    }

    /// Account id for records written before the account is resolved
    ///
    /// Looks the caller up without provisioning, so a registered account is
    /// credited with its own id rather than the token's email.
    async fn attributed_user_id(&self, identity: &Identity) -> String {
        match self.accounts.find_account(identity).await {
            Ok(Some(account)) => account.user_id,
            Ok(None) => provisional_user_id(identity),
            Err(e) => {
                warn!(email = %identity.email, error = %e, "Account lookup for usage attribution failed");
                provisional_user_id(identity)
            }
        }
    }

    async fn settle(&self, account: &Account, amount: i64) -> Result<i64, LedgerError> {
        if amount == 0 {
            return self.ledger.get_balance(&account.user_id).await;
        }
        self.ledger.debit(&account.user_id, amount).await
    }

    fn shape(&self, method: AuthMethod, user_id: &str, remaining: i64, upstream: UpstreamResult) -> ShapedResponse {
        let status = if upstream.success { 200 } else { 400 };

        let body = match method {
            AuthMethod::OpaqueKey => upstream.raw,
            AuthMethod::SignedToken if upstream.success => json!({
                "message": "Operation completed successfully",
                "userId": user_id,
                "remainingCredits": remaining,
                "result": upstream.raw,
                "processedAt": Utc::now(),
            }),
            AuthMethod::SignedToken => {
                let translated = self.translator.translate(upstream.failure_message());
                json!({
                    "userMessage": translated.user_message,
                    "technicalMessage": translated.technical_message,
                    "suggestion": translated.suggestion,
                    "code": translated.code,
                    "upstream": upstream.raw,
                })
            }
        };

        ShapedResponse { status, body }
    }

    fn record(&self, scope: &RequestScope<'_>, user_id: &str, settlement: Settlement) {
        self.recorder.record(NewUsageRecord {
            user_id: user_id.to_string(),
            email: scope.email.clone(),
            operation_name: scope.descriptor.service_name.to_string(),
            endpoint: scope.meta.endpoint.clone(),
            method: scope.meta.method.clone(),
            success: settlement.success,
            error_message: settlement.error_message,
            credits_charged: settlement.credits_charged,
            request_id: scope.request_id.clone(),
            ip_address: scope.meta.ip_address.clone(),
            user_agent: scope.meta.user_agent.clone(),
            auth_method: scope.auth_method.to_string(),
            processing_time_ms: scope.started.elapsed().as_millis() as i64,
            created_at: Utc::now(),
        });
    }
}
