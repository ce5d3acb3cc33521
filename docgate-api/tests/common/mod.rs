/// Common test utilities for integration tests
///
/// This module provides shared infrastructure for integration tests:
/// - An application wired over the in-memory stores
/// - Scripted upstreams for `face-detect` and `qr-masking`
/// - Signed token generation against the test key set
/// - Account and API key fixtures
/// - Request helpers

use axum::body::Body;
use axum::http::{Request, StatusCode};
use docgate_api::app::{build_router, AppState};
use docgate_api::config::Config;
use docgate_pipeline::adapters::{MockOperation, MockReply};
use docgate_pipeline::catalog::{default_descriptors, Catalog};
use docgate_pipeline::recorder::{RecorderConfig, RecorderHandle, UsageRecorder};
use docgate_shared::auth::api_key::{display_prefix, generate_api_key};
use docgate_shared::auth::jwks::{JwkSet, KeySetCache, StaticKeySetSource};
use docgate_shared::auth::jwt::SignedTokenVerifier;
use docgate_shared::models::account::CreateAccount;
use docgate_shared::models::api_key::CreateApiKey;
use docgate_shared::store::memory::MemoryStore;
use docgate_shared::store::Stores;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::Service as _;

pub const TEST_ISSUER: &str = "https://auth.docgate.test";
const TEST_KID: &str = "docgate-test-key";
const TEST_PEM: &str = include_str!("../../../docgate-shared/tests/fixtures/test_rsa.pem");
const TEST_JWKS: &str = include_str!("../../../docgate-shared/tests/fixtures/jwks.json");

/// A document long enough to pass request validation
pub const DOC: &str = "aGVsbG8gd29ybGQgZG9jdW1lbnQ=";

/// Test context containing all necessary resources
pub struct TestContext {
    pub app: axum::Router,
    pub store: Arc<MemoryStore>,
    pub stores: Stores,
    pub face_detect: Arc<MockOperation>,
    pub qr_masking: Arc<MockOperation>,
    pub recorder: RecorderHandle,
}

impl TestContext {
    /// Creates a new test context with fresh in-memory state
    ///
    /// `face-detect` answers with a detected face unless a reply is queued;
    /// `qr-masking` answers with a masked document. Every other operation is
    /// left unconfigured.
    pub async fn new() -> anyhow::Result<Self> {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "postgres://localhost/docgate_test"),
            ("AUTH_ISSUER_URL", TEST_ISSUER),
            ("STARTING_CREDITS", "10"),
        ]);
        let config = Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()))?;

        let store = Arc::new(MemoryStore::new());
        let stores = Stores::from_memory(store.clone());

        let key_set: JwkSet = serde_json::from_str(TEST_JWKS)?;
        let keys = KeySetCache::new(Arc::new(StaticKeySetSource::new(key_set)), Duration::from_secs(3600));
        let verifier = Arc::new(SignedTokenVerifier::new(TEST_ISSUER, keys));

        let face_detect = Arc::new(MockOperation::new(
            "face-detect",
            MockReply::success(json!({ "faces": 1, "req_id": "r-1" })),
        ));
        let qr_masking = Arc::new(MockOperation::new(
            "qr-masking",
            MockReply::success(json!({ "masked_base64": "bWFza2Vk" })),
        ));
        let catalog = Catalog::new(default_descriptors())
            .with_operation("face-detect", face_detect.clone())
            .with_operation("qr-masking", qr_masking.clone());

        let (recorder, handle) = UsageRecorder::spawn(stores.usage.clone(), RecorderConfig::default());

        let state = AppState::new(config, stores.clone(), verifier, catalog, recorder);
        let app = build_router(state);

        Ok(TestContext {
            app,
            store,
            stores,
            face_detect,
            qr_masking,
            recorder: handle,
        })
    }

    /// Signed token for `email`, optionally carrying the admin role
    pub fn token_for(&self, email: &str, admin: bool) -> String {
        let roles = if admin {
            json!([{ "id": "r1", "key": "admin", "name": "Admin" }])
        } else {
            json!([])
        };
        let claims = json!({
            "sub": format!("kp_{}", email),
            "email": email,
            "iss": TEST_ISSUER,
            "exp": chrono::Utc::now().timestamp() + 3600,
            "iat": chrono::Utc::now().timestamp(),
            "roles": roles,
        });

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(TEST_KID.to_string());
        let key = EncodingKey::from_rsa_pem(TEST_PEM.as_bytes()).unwrap();
        encode(&header, &claims, &key).unwrap()
    }

    /// Creates an account with a chosen balance
    pub async fn create_account(&self, user_id: &str, email: &str, balance: i64) {
        self.stores
            .accounts
            .create(CreateAccount {
                user_id: user_id.to_string(),
                email: email.to_string(),
                balance,
            })
            .await
            .unwrap();
    }

    /// Issues an API key for an existing account and returns the plaintext
    pub async fn create_api_key(&self, user_id: &str, email: &str) -> String {
        let (key, key_hash) = generate_api_key();
        self.stores
            .keys
            .create(CreateApiKey {
                user_id: user_id.to_string(),
                email: email.to_string(),
                key_name: "test key".to_string(),
                key_hash,
                key_prefix: display_prefix(&key),
                expires_at: None,
            })
            .await
            .unwrap();
        key
    }

    /// Current balance of an account
    pub async fn balance(&self, user_id: &str) -> i64 {
        self.stores.accounts.get(user_id).await.unwrap().unwrap().balance
    }

    /// Sends a request and returns the status with the parsed JSON body
    pub async fn send(&self, method: &str, uri: &str, credential: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(credential) = credential {
            builder = builder.header("authorization", format!("Bearer {}", credential));
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().call(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };

        (status, body)
    }

    /// Sends a raw JSON-typed body that may not parse
    pub async fn send_raw(&self, uri: &str, credential: &str, raw: &'static str) -> StatusCode {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("authorization", format!("Bearer {}", credential))
            .header("content-type", "application/json")
            .body(Body::from(raw))
            .unwrap();

        self.app.clone().call(request).await.unwrap().status()
    }

    /// Drains the usage recorder so every queued record is persisted
    pub async fn flush_usage(self) -> Arc<MemoryStore> {
        self.recorder.shutdown().await;
        self.store
    }
}

/// Face detection request body
pub fn face_body() -> Value {
    json!({ "req_id": "r-1", "doc_base64": DOC })
}

/// Helper to wait for condition with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout_secs: u64) -> anyhow::Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);

    loop {
        if condition().await {
            return Ok(());
        }

        if start.elapsed() > timeout {
            anyhow::bail!("Condition not met within {} seconds", timeout_secs);
        }

        tokio::time::sleep(tokio::time::Duration::from_millis(25)).await;
    }
}
