//! Common test utilities for run-board integration tests
//!
//! This module provides:
//! - Router builders wired with real pipeline components
//! - Signed webhook request builders
//! - Workflow run payload fixtures

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use hmac::{Hmac, Mac};
use run_board_api::{create_router, AppState, ServiceConfig, ServiceMetrics};
use run_board_core::{
    Environment, InMemoryRunStore, RelayPolicy, RunIngestor, RunStore, SharedSecretVerifier,
};
use sha2::Sha256;
use std::sync::Arc;
use tower::ServiceExt;

#[allow(dead_code)]
pub const TEST_SECRET: &str = "integration-test-secret";

/// Service configuration with the shared test secret installed
#[allow(dead_code)]
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.webhooks.secret = Some(TEST_SECRET.to_string());
    config
}

/// Build a router over a fresh in-memory store
///
/// The returned store handle shares state with the router, so tests can
/// assert on stored rows directly.
#[allow(dead_code)]
pub fn build_app() -> (Router, InMemoryRunStore) {
    let store = InMemoryRunStore::new();
    let app = build_app_with(
        Arc::new(store.clone()),
        RelayPolicy::strict(Environment::Development),
    );
    (app, store)
}

/// Build a router over an arbitrary store and relay policy
#[allow(dead_code)]
pub fn build_app_with(store: Arc<dyn RunStore>, relay_policy: RelayPolicy) -> Router {
    let verifier = SharedSecretVerifier::new(TEST_SECRET.to_string());
    let ingestor = RunIngestor::new(Some(Arc::new(verifier)), store.clone(), relay_policy);

    let state = AppState::new(
        test_config(),
        Arc::new(ingestor),
        store,
        Arc::new(ServiceMetrics::default()),
    );
    create_router(state)
}

/// HMAC-SHA256 signature header value over a request body
#[allow(dead_code)]
pub fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(TEST_SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Timestamp fixture within a single test hour
#[allow(dead_code)]
pub fn ts(minute: u32) -> String {
    format!("2026-08-20T10:{minute:02}:00Z")
}

// ============================================================================
// Workflow Run Payload Fixtures
// ============================================================================

/// Builder for `workflow_run` event payloads
#[derive(Clone)]
#[allow(dead_code)]
pub struct RunPayload {
    pub run_id: u64,
    pub full_name: String,
    pub workflow_id: u64,
    pub workflow_name: String,
    pub display_title: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub updated_at: String,
}

#[allow(dead_code)]
impl RunPayload {
    pub fn completed(run_id: u64, full_name: &str, conclusion: &str, updated_at: &str) -> Self {
        Self {
            run_id,
            full_name: full_name.to_string(),
            workflow_id: 9001,
            workflow_name: "CI".to_string(),
            display_title: format!("Run {run_id}"),
            status: "completed".to_string(),
            conclusion: Some(conclusion.to_string()),
            updated_at: updated_at.to_string(),
        }
    }

    pub fn active(run_id: u64, full_name: &str, status: &str, updated_at: &str) -> Self {
        Self {
            status: status.to_string(),
            conclusion: None,
            ..Self::completed(run_id, full_name, "success", updated_at)
        }
    }

    pub fn with_workflow(mut self, workflow_id: u64, workflow_name: &str) -> Self {
        self.workflow_id = workflow_id;
        self.workflow_name = workflow_name.to_string();
        self
    }

    pub fn json(&self) -> serde_json::Value {
        let (owner, name) = self.full_name.split_once('/').unwrap();
        serde_json::json!({
            "action": "completed",
            "workflow_run": {
                "id": self.run_id,
                "run_number": self.run_id,
                "run_attempt": 1,
                "workflow_id": self.workflow_id,
                "name": self.workflow_name,
                "display_title": self.display_title,
                "status": self.status,
                "conclusion": self.conclusion,
                "head_branch": "main",
                "head_sha": "d6fde92930d4715a2b49857d24b940956b26d2d3",
                "event": "push",
                "actor": {
                    "login": "octocat",
                    "avatar_url": "https://avatars.example.com/u/1"
                },
                "created_at": "2026-08-20T10:00:00Z",
                "updated_at": self.updated_at,
                "run_started_at": "2026-08-20T10:00:05Z",
                "html_url": format!(
                    "https://github.com/{}/actions/runs/{}",
                    self.full_name, self.run_id
                )
            },
            "repository": {
                "name": name,
                "full_name": self.full_name,
                "html_url": format!("https://github.com/{}", self.full_name),
                "owner": {
                    "login": owner,
                    "avatar_url": "https://avatars.example.com/u/1"
                }
            }
        })
    }
}

// ============================================================================
// Request Helpers
// ============================================================================

/// POST a payload to the webhook endpoint with a valid signature
#[allow(dead_code)]
pub fn signed_webhook_request(event: &str, payload: &serde_json::Value) -> Request<Body> {
    let body = serde_json::to_vec(payload).unwrap();
    Request::builder()
        .method("POST")
        .uri("/api/webhooks")
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-github-delivery", format!("delivery-{}", uuid::Uuid::new_v4()))
        .header("x-hub-signature-256", sign(&body))
        .body(Body::from(body))
        .unwrap()
}

#[allow(dead_code)]
pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[allow(dead_code)]
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Deliver a `workflow_run` payload and assert it was acknowledged
#[allow(dead_code)]
pub async fn deliver(app: &Router, payload: &RunPayload) {
    let response = app
        .clone()
        .oneshot(signed_webhook_request("workflow_run", &payload.json()))
        .await
        .unwrap();
    assert_eq!(
        response.status(),
        axum::http::StatusCode::OK,
        "delivery for run {} was not acknowledged",
        payload.run_id
    );
}
