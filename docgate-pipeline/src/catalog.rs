/// Operation catalog
///
/// The single table that declares every metered operation: its price, its
/// charging rule, its time budget, the request shape it accepts and where its
/// upstream lives. Handlers and the orchestrator never hard-code any of this.
///
/// | Route | Usage name | Cost | Charge on response | Timeout | Upstream variable |
/// |---|---|---|---|---|---|
/// | `qr-masking` | `qr-masking` | 2 | no | 30 s | `QR_MASKING_API_URL` |
/// | `qr-extraction` | `qr-extraction` | 1 | yes | 30 s | `QR_EXTRACTION_API_URL` |
/// | `id-cropping` | `id-cropping` | 1 | yes | 30 s | `ID_CROPPING_API_URL` |
/// | `signature-verification` | `signature-verification` | 2 | yes | 60 s | `SIGNATURE_VERIFICATION_API_URL` |
/// | `face-detect` | `face-detection` | 1 | yes | 30 s | `FACE_DETECTION_API_URL` |
/// | `face-verification` | `face-verification` | 2 | no | 30 s | `FACE_VERIFICATION_API_URL` |
///
/// Operations without a configured upstream stay in the catalog and answer
/// "not configured" without touching the ledger.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use docgate_shared::ledger::SettlementPolicy;

use crate::adapters::{ExternalOperation, HttpOperation};
use crate::timeout::{clamp_timeout, DEFAULT_TIMEOUT, SIGNATURE_TIMEOUT};

/// Minimum length of a base64 document field
pub const MIN_DOCUMENT_LENGTH: usize = 10;

/// Maximum number of documents in a list-shaped request
pub const MAX_DOCUMENTS: usize = 10;

/// Maximum size of one document in a list-shaped request (10 MiB)
pub const MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;

/// One rejected field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Accepted request body layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    /// One base64 document in the named field
    SingleDocument { field: &'static str },

    /// `doc_base64`: 1-10 non-empty strings, each at most 10 MiB
    DocumentList,

    /// `doc_base64_1`, `doc_base64_2` and `doc_type = "face"`
    FacePair,
}

impl RequestShape {
    /// Validates a body and returns it as an object
    ///
    /// Every request must carry a non-empty string `req_id`. All violations
    /// are collected rather than stopping at the first.
    pub fn validate(&self, body: &Value) -> Result<Map<String, Value>, Vec<FieldViolation>> {
        let object = match body.as_object() {
            Some(object) => object,
            None => return Err(vec![FieldViolation::new("body", "request body must be a JSON object")]),
        };

        let mut violations = Vec::new();

        match object.get("req_id").and_then(Value::as_str) {
            Some(req_id) if !req_id.trim().is_empty() => {}
            _ => violations.push(FieldViolation::new("req_id", "req_id is required")),
        }

        match self {
            RequestShape::SingleDocument { field } => {
                check_document(object, field, &mut violations);
            }
            RequestShape::DocumentList => check_document_list(object, &mut violations),
            RequestShape::FacePair => {
                check_document(object, "doc_base64_1", &mut violations);
                check_document(object, "doc_base64_2", &mut violations);
                if object.get("doc_type").and_then(Value::as_str) != Some("face") {
                    violations.push(FieldViolation::new("doc_type", "doc_type must be 'face'"));
                }
            }
        }

        if violations.is_empty() {
            Ok(object.clone())
        } else {
            Err(violations)
        }
    }
}

fn check_document(object: &Map<String, Value>, field: &str, violations: &mut Vec<FieldViolation>) {
    match object.get(field).and_then(Value::as_str) {
        Some(doc) if doc.len() >= MIN_DOCUMENT_LENGTH => {}
        Some(_) => violations.push(FieldViolation::new(
            field,
            format!("{} must be at least {} characters", field, MIN_DOCUMENT_LENGTH),
        )),
        None => violations.push(FieldViolation::new(field, format!("{} is required", field))),
    }
}

fn check_document_list(object: &Map<String, Value>, violations: &mut Vec<FieldViolation>) {
    let docs = match object.get("doc_base64").and_then(Value::as_array) {
        Some(docs) => docs,
        None => {
            violations.push(FieldViolation::new("doc_base64", "doc_base64 must be an array of strings"));
            return;
        }
    };

    if docs.is_empty() || docs.len() > MAX_DOCUMENTS {
        violations.push(FieldViolation::new(
            "doc_base64",
            format!("doc_base64 must contain between 1 and {} documents", MAX_DOCUMENTS),
        ));
    }

    for (index, doc) in docs.iter().enumerate() {
        let field = format!("doc_base64[{}]", index);
        match doc.as_str() {
            Some(s) if s.is_empty() => violations.push(FieldViolation::new(&field, "document must not be empty")),
            Some(s) if s.len() > MAX_DOCUMENT_BYTES => {
                violations.push(FieldViolation::new(&field, "document exceeds 10 MiB"))
            }
            Some(_) => {}
            None => violations.push(FieldViolation::new(&field, "document must be a string")),
        }
    }
}

/// Declaration of one metered operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    /// Route name (`/api/v1/operations/{name}`)
    pub name: &'static str,

    /// Name written to usage records
    pub service_name: &'static str,

    pub policy: SettlementPolicy,

    pub timeout: Duration,

    pub shape: RequestShape,

    /// Environment variable holding the upstream URL
    pub upstream_env: &'static str,
}

impl OperationDescriptor {
    const fn new(
        name: &'static str,
        service_name: &'static str,
        policy: SettlementPolicy,
        timeout: Duration,
        shape: RequestShape,
        upstream_env: &'static str,
    ) -> Self {
        Self {
            name,
            service_name,
            policy,
            timeout,
            shape,
            upstream_env,
        }
    }
}

/// Built-in operation table
pub fn default_descriptors() -> Vec<OperationDescriptor> {
    vec![
        OperationDescriptor::new(
            "qr-masking",
            "qr-masking",
            SettlementPolicy::new(2, false),
            DEFAULT_TIMEOUT,
            RequestShape::SingleDocument { field: "base64_str" },
            "QR_MASKING_API_URL",
        ),
        OperationDescriptor::new(
            "qr-extraction",
            "qr-extraction",
            SettlementPolicy::new(1, true),
            DEFAULT_TIMEOUT,
            RequestShape::SingleDocument { field: "doc_base64" },
            "QR_EXTRACTION_API_URL",
        ),
        OperationDescriptor::new(
            "id-cropping",
            "id-cropping",
            SettlementPolicy::new(1, true),
            DEFAULT_TIMEOUT,
            RequestShape::SingleDocument { field: "doc_base64" },
            "ID_CROPPING_API_URL",
        ),
        OperationDescriptor::new(
            "signature-verification",
            "signature-verification",
            SettlementPolicy::new(2, true),
            SIGNATURE_TIMEOUT,
            RequestShape::DocumentList,
            "SIGNATURE_VERIFICATION_API_URL",
        ),
        OperationDescriptor::new(
            "face-detect",
            "face-detection",
            SettlementPolicy::new(1, true),
            DEFAULT_TIMEOUT,
            RequestShape::SingleDocument { field: "doc_base64" },
            "FACE_DETECTION_API_URL",
        ),
        OperationDescriptor::new(
            "face-verification",
            "face-verification",
            SettlementPolicy::new(2, false),
            DEFAULT_TIMEOUT,
            RequestShape::FacePair,
            "FACE_VERIFICATION_API_URL",
        ),
    ]
}

/// Descriptors plus the adapters wired to them
#[derive(Clone, Default)]
pub struct Catalog {
    descriptors: Vec<OperationDescriptor>,
    operations: HashMap<String, Arc<dyn ExternalOperation>>,
}

impl Catalog {
    /// Catalog with descriptors and no adapters
    pub fn new(descriptors: Vec<OperationDescriptor>) -> Self {
        Self {
            descriptors,
            operations: HashMap::new(),
        }
    }

    /// Wires HTTP adapters for every descriptor whose upstream URL resolves
    ///
    /// `lookup` maps an environment variable name to its value.
    pub fn from_upstreams<F>(descriptors: Vec<OperationDescriptor>, lookup: F) -> Result<Self, reqwest::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut catalog = Self::new(descriptors);

        for descriptor in catalog.descriptors.clone() {
            match lookup(descriptor.upstream_env).filter(|url| !url.trim().is_empty()) {
                Some(url) => {
                    info!(operation = descriptor.name, url = %url, "Configured upstream");
                    let op = HttpOperation::new(descriptor.name, url, clamp_timeout(descriptor.timeout))?;
                    catalog.operations.insert(descriptor.name.to_string(), Arc::new(op));
                }
                None => warn!(
                    operation = descriptor.name,
                    variable = descriptor.upstream_env,
                    "Upstream not configured, operation will answer 503"
                ),
            }
        }

        Ok(catalog)
    }

    /// Attaches an adapter to an operation
    pub fn with_operation(mut self, name: &str, operation: Arc<dyn ExternalOperation>) -> Self {
        self.operations.insert(name.to_string(), operation);
        self
    }

    pub fn descriptor(&self, name: &str) -> Option<&OperationDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn descriptors(&self) -> &[OperationDescriptor] {
        &self.descriptors
    }

    /// Adapter for an operation, `None` if not configured
    pub fn operation(&self, name: &str) -> Option<Arc<dyn ExternalOperation>> {
        self.operations.get(name).cloned()
    }

    pub fn is_configured(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockOperation, MockReply};
    use serde_json::json;

    fn doc() -> String {
        "aGVsbG8gd29ybGQ=".to_string()
    }

    fn shape_of(name: &str) -> RequestShape {
        default_descriptors()
            .into_iter()
            .find(|d| d.name == name)
            .map(|d| d.shape)
            .unwrap()
    }

    #[test]
    fn test_policy_table() {
        let catalog = Catalog::new(default_descriptors());

        let face = catalog.descriptor("face-detect").unwrap();
        assert_eq!(face.service_name, "face-detection");
        assert_eq!(face.policy, SettlementPolicy::new(1, true));

        let masking = catalog.descriptor("qr-masking").unwrap();
        assert_eq!(masking.policy, SettlementPolicy::new(2, false));

        let signature = catalog.descriptor("signature-verification").unwrap();
        assert_eq!(signature.timeout, SIGNATURE_TIMEOUT);

        assert!(catalog.descriptor("teleport").is_none());
        assert_eq!(catalog.descriptors().len(), 6);
    }

    #[test]
    fn test_single_document_shape() {
        let shape = shape_of("qr-masking");

        assert!(shape.validate(&json!({"req_id": "r-1", "base64_str": doc()})).is_ok());

        let errors = shape.validate(&json!({"base64_str": "short"})).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["req_id", "base64_str"]);
    }

    #[test]
    fn test_non_object_body() {
        let errors = shape_of("id-cropping").validate(&json!([1, 2])).unwrap_err();
        assert_eq!(errors[0].field, "body");
    }

    #[test]
    fn test_document_list_shape() {
        let shape = shape_of("signature-verification");

        assert!(shape.validate(&json!({"req_id": "r", "doc_base64": [doc(), doc()]})).is_ok());
        assert!(shape.validate(&json!({"req_id": "r", "doc_base64": []})).is_err());
        assert!(shape.validate(&json!({"req_id": "r", "doc_base64": [doc(), ""]})).is_err());
        assert!(shape.validate(&json!({"req_id": "r", "doc_base64": doc()})).is_err());

        let eleven: Vec<String> = (0..11).map(|_| doc()).collect();
        assert!(shape.validate(&json!({"req_id": "r", "doc_base64": eleven})).is_err());

        let huge = "a".repeat(MAX_DOCUMENT_BYTES + 1);
        let errors = shape.validate(&json!({"req_id": "r", "doc_base64": [huge]})).unwrap_err();
        assert_eq!(errors[0].field, "doc_base64[0]");
    }

    #[test]
    fn test_face_pair_shape() {
        let shape = shape_of("face-verification");

        assert!(shape
            .validate(&json!({"req_id": "r", "doc_base64_1": doc(), "doc_base64_2": doc(), "doc_type": "face"}))
            .is_ok());

        let errors = shape
            .validate(&json!({"req_id": "r", "doc_base64_1": doc(), "doc_base64_2": doc(), "doc_type": "id"}))
            .unwrap_err();
        assert_eq!(errors[0].field, "doc_type");
    }

    #[test]
    fn test_from_upstreams_skips_unset() {
        let catalog = Catalog::from_upstreams(default_descriptors(), |var| {
            (var == "QR_MASKING_API_URL").then(|| "http://localhost:9000/mask".to_string())
        })
        .unwrap();

        assert!(catalog.is_configured("qr-masking"));
        assert!(!catalog.is_configured("face-detect"));
        assert!(catalog.descriptor("face-detect").is_some());
    }

    #[test]
    fn test_with_operation() {
        let catalog = Catalog::new(default_descriptors()).with_operation(
            "face-detect",
            Arc::new(MockOperation::new("face-detect", MockReply::success(json!({})))),
        );

        assert_eq!(catalog.operation("face-detect").unwrap().name(), "face-detect");
    }
}
