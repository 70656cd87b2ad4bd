//! End-to-end tests for the metering gateway.
//!
//! These drive the full router with an in-memory store and a scripted
//! completion backend: webhook ingestion, metered chat, enforcement
//! denials, snapshots, and admin operations.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use http_body_util::BodyExt;
use metering_config::MeteringConfig;
use metering_core::ModelId;
use metering_server::routes::create_router;
use metering_server::{AppState, Completion, CompletionClient, CompletionError};
use metering_store::MemoryStore;
use metering_webhooks::sign;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "whsec_e2e";

/// Scripted completion backend: echoes deterministically, reports fixed
/// token usage, and can be flipped into a failing state.
struct ScriptedBackend {
    output_tokens: u32,
    failing: AtomicBool,
}

impl ScriptedBackend {
    fn new(output_tokens: u32) -> Self {
        Self {
            output_tokens,
            failing: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedBackend {
    async fn complete(
        &self,
        model: &ModelId,
        message: &str,
    ) -> Result<Completion, CompletionError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CompletionError::Backend { status: 500 });
        }
        Ok(Completion {
            content: format!("{model} says: {message}"),
            input_tokens: 10,
            output_tokens: self.output_tokens,
        })
    }
}

fn test_config() -> MeteringConfig {
    MeteringConfig::from_yaml(&format!("webhooks:\n  secret: {SECRET}\n")).unwrap()
}

fn test_state(backend: Arc<ScriptedBackend>) -> AppState {
    AppState::builder()
        .config(test_config())
        .store(Arc::new(MemoryStore::new()))
        .completions(backend)
        .build()
        .expect("test state")
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, json)
}

fn signed_webhook(body: &str) -> Request<Body> {
    let signature = sign(SECRET, body.as_bytes()).unwrap();
    Request::builder()
        .method(Method::POST)
        .uri("/webhooks/subscriptions/billing-test")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-webhook-signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn chat_request(user_id: &str, message: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/v1/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"user_id": user_id, "message": message}).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn test_webhook_then_chat_flow() {
    let app = create_router(test_state(Arc::new(ScriptedBackend::new(50))));

    let body = r#"{"type":"subscription.created","user_id":"alice","tier":"core"}"#;
    let (status, json) = send(&app, signed_webhook(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["accepted"], true);
    assert_eq!(json["applied"], true);

    let (status, json) = send(&app, chat_request("alice", "hello there")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["tier"], "core");
    assert_eq!(json["model"], "nova-mini");
    assert!(json["message"].as_str().unwrap().contains("hello there"));
    assert!(json["usage"]["actual_cost"].as_i64().unwrap() > 0);

    let (status, json) = send(
        &app,
        Request::builder()
            .uri("/v1/usage/alice")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message_count"], 1);
    assert_eq!(json["daily_message_quota"], 200);
    assert_eq!(json["remaining_messages"], 199);
}

#[tokio::test]
async fn test_webhook_with_bad_signature_rejected() {
    let app = create_router(test_state(Arc::new(ScriptedBackend::new(10))));

    let body = r#"{"type":"subscription.created","user_id":"bob","tier":"studio"}"#;
    let signature = sign("wrong_secret", body.as_bytes()).unwrap();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/subscriptions/billing-test")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-webhook-signature", signature)
        .body(Body::from(body))
        .unwrap();

    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "invalid_signature");

    // The profile was never written.
    let (_, usage) = send(
        &app,
        Request::builder()
            .uri("/v1/usage/bob")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(usage["tier"], "free");
}

#[tokio::test]
async fn test_malformed_payload_with_valid_signature() {
    let app = create_router(test_state(Arc::new(ScriptedBackend::new(10))));

    let (status, json) = send(&app, signed_webhook(r#"{"unexpected":"shape"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "malformed_payload");
}

#[tokio::test]
async fn test_free_tier_daily_limit() {
    let app = create_router(test_state(Arc::new(ScriptedBackend::new(10))));

    // Free quota is 15; unknown users default to free.
    for i in 0..15 {
        let (status, _) = send(&app, chat_request("carol", "hi")).await;
        assert_eq!(status, StatusCode::OK, "message {i}");
    }

    let (status, json) = send(&app, chat_request("carol", "hi")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["allowed"], false);
    assert_eq!(json["reason"], "daily_limit_reached");
}

#[tokio::test]
async fn test_budget_ceiling_denial() {
    // Studio has unlimited quota and a $20 ceiling. The scripted backend
    // reports 200K output tokens; on nova-max that reconciles to $12 per
    // turn, so the third turn must be refused on budget.
    let app = create_router(test_state(Arc::new(ScriptedBackend::new(200_000))));

    let body = r#"{"type":"subscription.created","user_id":"dave","tier":"studio"}"#;
    send(&app, signed_webhook(body)).await;

    // Long message with complexity keywords selects the top model.
    let message = format!("please analyze and debug this code {}", "x".repeat(1300));
    for turn in 0..2 {
        let (status, json) = send(&app, chat_request("dave", &message)).await;
        assert_eq!(status, StatusCode::OK, "turn {turn}");
        assert_eq!(json["model"], "nova-max");
    }

    let (status, json) = send(&app, chat_request("dave", &message)).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json["reason"], "budget_ceiling_exceeded");
}

#[tokio::test]
async fn test_backend_failure_is_not_refunded() {
    let backend = Arc::new(ScriptedBackend::new(10));
    let app = create_router(test_state(backend.clone()));

    backend.failing.store(true, Ordering::SeqCst);
    let (status, json) = send(&app, chat_request("erin", "hi")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"]["code"], "completion_backend_error");

    let (_, usage) = send(
        &app,
        Request::builder()
            .uri("/v1/usage/erin")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    // Conservative accounting: the slot and the reserved estimate stand.
    assert_eq!(usage["message_count"], 1);
    assert!(usage["cost_accumulated"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_snapshot_run_and_rerun() {
    let app = create_router(test_state(Arc::new(ScriptedBackend::new(10))));

    send(&app, chat_request("frank", "hello")).await;

    let snapshot_request = || {
        Request::builder()
            .method(Method::POST)
            .uri("/admin/snapshots")
            .body(Body::empty())
            .unwrap()
    };

    let (status, json) = send(&app, snapshot_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["snapshots_created"], 1);

    let (_, json) = send(&app, snapshot_request()).await;
    assert_eq!(json["snapshots_created"], 0);

    let (status, csv) = send(
        &app,
        Request::builder()
            .uri("/admin/snapshots/export")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let csv = csv.as_str().unwrap().to_string();
    assert!(csv.starts_with("user_id,"));
    assert!(csv.contains("frank"));

    let (status, json) = send(
        &app,
        Request::builder()
            .uri("/admin/tiers/summary")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let free = json
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["tier"] == "free")
        .unwrap();
    assert_eq!(free["active_users"], 1);
}

#[tokio::test]
async fn test_admin_reset_and_audit_trail() {
    let app = create_router(test_state(Arc::new(ScriptedBackend::new(10))));

    send(&app, chat_request("grace", "hello")).await;

    let (status, json) = send(
        &app,
        Request::builder()
            .method(Method::POST)
            .uri("/admin/usage/grace/reset")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message_count_before"], 1);

    let (_, usage) = send(
        &app,
        Request::builder()
            .uri("/v1/usage/grace")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(usage["message_count"], 0);

    let (status, json) = send(
        &app,
        Request::builder()
            .uri("/admin/audit/grace")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["provider"], "admin");
}

#[tokio::test]
async fn test_webhook_replay_idempotent_on_state() {
    let app = create_router(test_state(Arc::new(ScriptedBackend::new(10))));

    let body = r#"{"type":"subscription.created","user_id":"henry","tier":"studio"}"#;
    for _ in 0..3 {
        let (status, _) = send(&app, signed_webhook(body)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, usage) = send(
        &app,
        Request::builder()
            .uri("/v1/usage/henry")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(usage["tier"], "studio");

    let (_, audit) = send(
        &app,
        Request::builder()
            .uri("/admin/audit/henry")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(audit["entries"].as_array().unwrap().len(), 3);
}
