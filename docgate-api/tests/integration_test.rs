/// Integration tests for the DocGate API
///
/// These tests drive the full router over the in-memory stores:
/// - Registration and balances
/// - Metered operations with API keys and signed tokens
/// - Charging policy and error shaping
/// - API key lifecycle
/// - Credit tokens
/// - Usage analytics

mod common;

use axum::http::StatusCode;
use common::{face_body, wait_for, TestContext, DOC};
use docgate_pipeline::adapters::MockReply;
use serde_json::json;

#[tokio::test]
async fn test_health_check() {
    let ctx = TestContext::new().await.unwrap();

    let (status, body) = ctx.send("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");

    let operations = body["operations"].as_array().unwrap();
    assert_eq!(operations.len(), 6);
    assert!(operations.iter().any(|op| op["name"] == "face-detect" && op["configured"] == true));
    assert!(operations.iter().any(|op| op["name"] == "id-cropping" && op["configured"] == false));
}

#[tokio::test]
async fn test_register_and_duplicate() {
    let ctx = TestContext::new().await.unwrap();
    let body = json!({ "userId": "alice", "email": "alice@example.com" });

    let (status, created) = ctx.send("POST", "/api/v1/register", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["userId"], "alice");
    assert_eq!(created["credits"], 10);

    let (status, conflict) = ctx.send("POST", "/api/v1/register", None, Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["error"], "conflict");
}

#[tokio::test]
async fn test_register_rejects_invalid_email() {
    let ctx = TestContext::new().await.unwrap();

    let (status, body) = ctx
        .send(
            "POST",
            "/api/v1/register",
            None,
            Some(json!({ "userId": "alice", "email": "not-an-email" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_balance_auto_provisions_account() {
    let ctx = TestContext::new().await.unwrap();
    let token = ctx.token_for("bob@example.com", false);

    let (status, body) = ctx.send("GET", "/api/v1/credits/balance", Some(&token), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], "bob@example.com");
    assert_eq!(body["email"], "bob@example.com");
    assert_eq!(body["credits"], 10);

    // Second contact reuses the same account
    let (_, again) = ctx.send("GET", "/api/v1/credits/balance", Some(&token), None).await;
    assert_eq!(again["credits"], 10);
}

#[tokio::test]
async fn test_operation_with_api_key_returns_raw_body() {
    let ctx = TestContext::new().await.unwrap();
    ctx.create_account("acme", "ops@acme.io", 5).await;
    let key = ctx.create_api_key("acme", "ops@acme.io").await;

    let (status, body) = ctx
        .send("POST", "/api/v1/operations/face-detect", Some(&key), Some(face_body()))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "faces": 1, "req_id": "r-1" }));
    assert_eq!(ctx.balance("acme").await, 4);
    assert_eq!(ctx.face_detect.call_count(), 1);
}

#[tokio::test]
async fn test_operation_with_signed_token_returns_envelope() {
    let ctx = TestContext::new().await.unwrap();
    let token = ctx.token_for("dave@example.com", false);

    let (status, body) = ctx
        .send("POST", "/api/v1/operations/face-detect", Some(&token), Some(face_body()))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Operation completed successfully");
    assert_eq!(body["userId"], "dave@example.com");
    assert_eq!(body["remainingCredits"], 9);
    assert_eq!(body["result"]["faces"], 1);
    assert!(body["processedAt"].is_string());
}

#[tokio::test]
async fn test_semantic_failure_is_translated_and_charged() {
    let ctx = TestContext::new().await.unwrap();
    let token = ctx.token_for("erin@example.com", false);
    ctx.face_detect.push(MockReply::failure("no face detected"));

    let (status, body) = ctx
        .send("POST", "/api/v1/operations/face-detect", Some(&token), Some(face_body()))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "FACE_DET_001");
    assert_eq!(body["userMessage"], "No face found in the image");
    assert_eq!(body["technicalMessage"], "no face detected");
    assert_eq!(ctx.balance("erin@example.com").await, 9);
}

#[tokio::test]
async fn test_semantic_failure_not_charged_when_policy_says_so() {
    let ctx = TestContext::new().await.unwrap();
    ctx.create_account("acme", "ops@acme.io", 5).await;
    let key = ctx.create_api_key("acme", "ops@acme.io").await;
    ctx.qr_masking.push(MockReply::failure("qr code not found"));

    let (status, body) = ctx
        .send(
            "POST",
            "/api/v1/operations/qr-masking",
            Some(&key),
            Some(json!({ "req_id": "r-2", "base64_str": DOC })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_message"], "qr code not found");
    assert_eq!(ctx.balance("acme").await, 5);
}

#[tokio::test]
async fn test_insufficient_credits_skips_upstream() {
    let ctx = TestContext::new().await.unwrap();
    ctx.create_account("broke", "broke@example.com", 0).await;
    let key = ctx.create_api_key("broke", "broke@example.com").await;

    let (status, body) = ctx
        .send("POST", "/api/v1/operations/face-detect", Some(&key), Some(face_body()))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "insufficient_credits");
    assert_eq!(ctx.face_detect.call_count(), 0);
    assert_eq!(ctx.balance("broke").await, 0);
}

#[tokio::test]
async fn test_unknown_and_unconfigured_operations() {
    let ctx = TestContext::new().await.unwrap();
    let token = ctx.token_for("frank@example.com", false);

    let (status, _) = ctx
        .send("POST", "/api/v1/operations/teleport", Some(&token), Some(face_body()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = ctx
        .send("POST", "/api/v1/operations/id-cropping", Some(&token), Some(face_body()))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "service_unavailable");
    assert_eq!(ctx.balance("frank@example.com").await, 10);
}

#[tokio::test]
async fn test_operation_validation_failure() {
    let ctx = TestContext::new().await.unwrap();
    let token = ctx.token_for("gina@example.com", false);

    let (status, body) = ctx
        .send(
            "POST",
            "/api/v1/operations/face-detect",
            Some(&token),
            Some(json!({ "doc_base64": DOC })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(ctx.face_detect.call_count(), 0);
}

#[tokio::test]
async fn test_missing_and_invalid_credentials() {
    let ctx = TestContext::new().await.unwrap();

    let (status, body) = ctx
        .send("POST", "/api/v1/operations/face-detect", None, Some(face_body()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = ctx
        .send("POST", "/api/v1/operations/face-detect", Some("not-a-token"), Some(face_body()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let unknown_key = format!("ak_live_{}", "0".repeat(64));
    let (status, _) = ctx
        .send("POST", "/api/v1/operations/face-detect", Some(&unknown_key), Some(face_body()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_failures_on_operations_are_recorded() {
    let ctx = TestContext::new().await.unwrap();

    let (status, _) = ctx
        .send("POST", "/api/v1/operations/face-detect", Some("garbage"), Some(face_body()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let unknown_key = format!("ak_live_{}", "0".repeat(64));
    let (status, _) = ctx
        .send("POST", "/api/v1/operations/qr-masking", Some(&unknown_key), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Not a catalog operation, nothing to file the record under
    let (status, _) = ctx
        .send("POST", "/api/v1/operations/teleport", Some("garbage"), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let store = ctx.flush_usage().await;
    let mut usage = store.usage_snapshot().await;
    usage.sort_by(|a, b| a.operation_name.cmp(&b.operation_name));

    assert_eq!(usage.len(), 2);
    assert_eq!(usage[0].operation_name, "face-detection");
    assert_eq!(usage[0].auth_method, "bearer_token");
    assert_eq!(usage[1].operation_name, "qr-masking");
    assert_eq!(usage[1].auth_method, "api_key");
    for record in &usage {
        assert_eq!(record.user_id, "unknown");
        assert_eq!(record.email, "unknown");
        assert_eq!(record.credits_charged, 0);
        assert!(!record.success);
    }
}

#[tokio::test]
async fn test_malformed_json_body_is_recorded() {
    let ctx = TestContext::new().await.unwrap();
    ctx.create_account("acme", "ops@acme.io", 5).await;
    let key = ctx.create_api_key("acme", "ops@acme.io").await;

    let status = ctx
        .send_raw("/api/v1/operations/face-detect", &key, "{not json")
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(ctx.face_detect.call_count(), 0);
    assert_eq!(ctx.balance("acme").await, 5);

    let store = ctx.flush_usage().await;
    let usage = store.usage_snapshot().await;
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].user_id, "acme");
    assert_eq!(usage[0].operation_name, "face-detection");
    assert_eq!(usage[0].credits_charged, 0);
    assert!(!usage[0].success);
    assert_eq!(usage[0].error_message.as_deref(), Some("request body parsing failed"));
}

#[tokio::test]
async fn test_api_key_rejected_on_signed_token_routes() {
    let ctx = TestContext::new().await.unwrap();
    ctx.create_account("acme", "ops@acme.io", 5).await;
    let key = ctx.create_api_key("acme", "ops@acme.io").await;

    let (status, _) = ctx.send("GET", "/api/v1/credits/balance", Some(&key), None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let ctx = TestContext::new().await.unwrap();
    ctx.create_account("alice", "alice@example.com", 1).await;
    let user = ctx.token_for("mallory@example.com", false);
    let admin = ctx.token_for("root@example.com", true);
    let body = json!({ "userId": "alice", "amount": 5 });

    let (status, _) = ctx.send("POST", "/api/v1/credits/add", Some(&user), Some(body.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, added) = ctx.send("POST", "/api/v1/credits/add", Some(&admin), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(added["credits"], 6);
}

#[tokio::test]
async fn test_deduct_is_scoped_to_caller() {
    let ctx = TestContext::new().await.unwrap();
    ctx.create_account("alice", "alice@example.com", 5).await;
    let user = ctx.token_for("henry@example.com", false);
    let admin = ctx.token_for("root@example.com", true);

    let (status, own) = ctx
        .send("POST", "/api/v1/credits/deduct", Some(&user), Some(json!({ "amount": 3 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(own["credits"], 7);

    let other = json!({ "userId": "alice", "amount": 2 });
    let (status, _) = ctx.send("POST", "/api/v1/credits/deduct", Some(&user), Some(other.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = ctx.send("POST", "/api/v1/credits/deduct", Some(&admin), Some(other)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["credits"], 3);

    let (status, body) = ctx
        .send("POST", "/api/v1/credits/deduct", Some(&user), Some(json!({ "amount": 100 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "insufficient_credits");
}

#[tokio::test]
async fn test_api_key_lifecycle() {
    let ctx = TestContext::new().await.unwrap();
    let token = ctx.token_for("ivy@example.com", false);

    let (status, created) = ctx
        .send("POST", "/api/v1/api-keys", Some(&token), Some(json!({ "keyName": "CI" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let first_key = created["apiKey"].as_str().unwrap().to_string();
    assert!(first_key.starts_with("ak_live_"));
    assert!(first_key.starts_with(created["keyPrefix"].as_str().unwrap()));

    let (_, current) = ctx.send("GET", "/api/v1/api-keys", Some(&token), None).await;
    assert_eq!(current["key"]["keyName"], "CI");
    assert!(current["key"].get("keyHash").is_none());

    // Creating again replaces the key
    let (_, replaced) = ctx
        .send("POST", "/api/v1/api-keys", Some(&token), Some(json!({ "keyName": "CI v2" })))
        .await;
    let second_key = replaced["apiKey"].as_str().unwrap().to_string();
    assert_eq!(ctx.store.key_count().await, 1);

    let (_, old) = ctx
        .send("POST", "/api/v1/validate/api-key", Some(&token), Some(json!({ "apiKey": first_key })))
        .await;
    assert_eq!(old["valid"], false);
    assert_eq!(old["reason"], "not found");

    let (_, fresh) = ctx
        .send("POST", "/api/v1/validate/api-key", Some(&token), Some(json!({ "apiKey": second_key })))
        .await;
    assert_eq!(fresh["valid"], true);

    let (status, _) = ctx
        .send("POST", "/api/v1/operations/face-detect", Some(&second_key), Some(face_body()))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, updated) = ctx
        .send("PUT", "/api/v1/api-keys", Some(&token), Some(json!({ "isActive": false })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["key"]["isActive"], false);

    let (status, _) = ctx
        .send("POST", "/api/v1/operations/face-detect", Some(&second_key), Some(face_body()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = ctx.send("DELETE", "/api/v1/api-keys", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = ctx.send("DELETE", "/api/v1/api-keys", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = ctx.send("GET", "/api/v1/api-keys/list", Some(&token), None).await;
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn test_api_key_expiry_must_be_in_future() {
    let ctx = TestContext::new().await.unwrap();
    let token = ctx.token_for("jack@example.com", false);

    let (status, body) = ctx
        .send(
            "POST",
            "/api/v1/api-keys",
            Some(&token),
            Some(json!({ "keyName": "old", "expiresAt": "2001-01-01T00:00:00Z" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(ctx.store.key_count().await, 0);
}

#[tokio::test]
async fn test_credit_token_generate_and_redeem() {
    let ctx = TestContext::new().await.unwrap();
    let admin = ctx.token_for("root@example.com", true);
    let user = ctx.token_for("kate@example.com", false);

    let (status, generated) = ctx
        .send(
            "POST",
            "/api/v1/tokens/generate",
            Some(&admin),
            Some(json!({ "credits": 25, "description": "promo" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let code = generated["token"].as_str().unwrap().to_string();

    let (status, redeemed) = ctx
        .send("POST", "/api/v1/tokens/redeem", Some(&user), Some(json!({ "token": code })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(redeemed["credits"], 25);
    assert_eq!(redeemed["remainingCredits"], 35);

    let (status, _) = ctx
        .send("POST", "/api/v1/tokens/redeem", Some(&user), Some(json!({ "token": code })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(ctx.balance("kate@example.com").await, 35);

    let (_, used) = ctx.send("GET", "/api/v1/tokens/used", Some(&admin), None).await;
    assert_eq!(used["total"], 1);
    assert_eq!(used["tokens"][0]["usedBy"], "kate@example.com");

    let (_, unused) = ctx.send("GET", "/api/v1/tokens/unused", Some(&admin), None).await;
    assert_eq!(unused["total"], 0);

    let token_id = used["tokens"][0]["id"].as_str().unwrap().to_string();
    let (status, _) = ctx
        .send("DELETE", &format!("/api/v1/tokens/{}", token_id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_credit_token_delete_requires_creator() {
    let ctx = TestContext::new().await.unwrap();
    let creator = ctx.token_for("root@example.com", true);
    let other_admin = ctx.token_for("ops@example.com", true);

    ctx.send("POST", "/api/v1/tokens/generate", Some(&creator), Some(json!({ "credits": 5 })))
        .await;

    let (_, mine) = ctx.send("GET", "/api/v1/tokens/my-tokens", Some(&creator), None).await;
    assert_eq!(mine["total"], 1);
    let token_id = mine["tokens"][0]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/tokens/{}", token_id);

    let (status, _) = ctx.send("DELETE", &uri, Some(&other_admin), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = ctx.send("DELETE", &uri, Some(&creator), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, all) = ctx.send("GET", "/api/v1/tokens/all", Some(&creator), None).await;
    assert_eq!(all["total"], 0);
}

#[tokio::test]
async fn test_usage_is_recorded_and_reported() {
    let ctx = TestContext::new().await.unwrap();
    let admin = ctx.token_for("root@example.com", true);
    let user = ctx.token_for("liam@example.com", false);

    ctx.send("POST", "/api/v1/operations/face-detect", Some(&user), Some(face_body()))
        .await;
    ctx.face_detect.push(MockReply::failure("no face detected"));
    ctx.send("POST", "/api/v1/operations/face-detect", Some(&user), Some(face_body()))
        .await;

    let store = ctx.store.clone();
    wait_for(
        || {
            let store = store.clone();
            async move { store.usage_snapshot().await.len() == 2 }
        },
        5,
    )
    .await
    .unwrap();

    let (status, services) = ctx.send("GET", "/api/v1/usage/services", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(services["total_services"], 1);
    assert_eq!(services["stats"][0]["service_name"], "face-detection");
    assert_eq!(services["stats"][0]["total_calls"], 2);
    assert_eq!(services["stats"][0]["total_credits"], 2);

    let (_, history) = ctx
        .send(
            "GET",
            "/api/v1/usage/users/liam@example.com/history?limit=1",
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(history["total_records"], 1);
    assert_eq!(history["pagination"]["limit"], 1);

    let (status, mine) = ctx.send("GET", "/api/v1/usage/me", Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["total_records"], 2);
    assert_eq!(mine["usage_history"][0]["auth_method"], "bearer_token");

    let (status, _) = ctx.send("GET", "/api/v1/usage/services", Some(&user), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = ctx
        .send("GET", "/api/v1/usage/users?start_date=yesterday", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_usage_drained_on_shutdown() {
    let ctx = TestContext::new().await.unwrap();
    ctx.create_account("acme", "ops@acme.io", 5).await;
    let key = ctx.create_api_key("acme", "ops@acme.io").await;

    ctx.send("POST", "/api/v1/operations/face-detect", Some(&key), Some(face_body()))
        .await;

    let store = ctx.flush_usage().await;
    let usage = store.usage_snapshot().await;

    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].user_id, "acme");
    assert_eq!(usage[0].auth_method, "api_key");
    assert_eq!(usage[0].credits_charged, 1);
    assert!(usage[0].success);
}
