//! Webhook Ingress (spec.md §4.8): axum HTTP server validating
//! `X-Hub-Signature-256`, enforcing a payload size cap, and routing
//! recognized GitHub events into the durable webhook queue.
//!
//! Enrichment, not teacher-grounded: the teacher never runs an inbound
//! HTTP server (`shipper::webhook` only signs outbound payloads). Shaped
//! after the pack's `axum` + `tower-http` usage for a small JSON-body
//! service with a body-size limit layer.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use serde_json::Value;
use tower_http::limit::RequestBodyLimitLayer;

use agent_runner_store::Store;
use agent_runner_types::{RepoRef, WebhookQueueEntry, WebhookQueueReason};
use agent_runner_webhook::{verify, SIGNATURE_HEADER};

use crate::config::WebhookConfig;

pub struct WebhookState {
    pub secret: Vec<u8>,
    pub store: Store,
    pub path: String,
}

const SUPPORTED_EVENTS: &[&str] = &[
    "issues",
    "issue_comment",
    "pull_request",
    "pull_request_review",
    "pull_request_review_comment",
    "pull_request_review_thread",
];

pub fn router(state: Arc<WebhookState>, config: &WebhookConfig) -> Router {
    let path = config.path.clone();
    Router::new()
        .route(&path, post(handle_webhook))
        .layer(RequestBodyLimitLayer::new(config.max_payload_bytes as usize))
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !verify(&state.secret, &body, signature) {
        return (StatusCode::UNAUTHORIZED, "signature mismatch");
    }

    let event = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let _delivery_id = headers
        .get("X-GitHub-Delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !SUPPORTED_EVENTS.contains(&event.as_str()) {
        return (StatusCode::OK, "ignored");
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid JSON"),
    };

    match enqueue_from_payload(&state.store, &payload) {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(err) => {
            tracing::error!(error = %err, event = %event, "webhook handler failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "handler error")
        }
    }
}

fn enqueue_from_payload(store: &Store, payload: &Value) -> anyhow::Result<()> {
    let Some(repo_full_name) = payload
        .get("repository")
        .and_then(|r| r.get("full_name"))
        .and_then(Value::as_str)
    else {
        return Ok(());
    };
    let Some((owner, name)) = repo_full_name.split_once('/') else {
        return Ok(());
    };
    let number = payload
        .get("issue")
        .or_else(|| payload.get("pull_request"))
        .and_then(|i| i.get("number"))
        .and_then(Value::as_u64);
    let Some(number) = number else {
        return Ok(());
    };
    let item_id = payload
        .get("issue")
        .or_else(|| payload.get("pull_request"))
        .and_then(|i| i.get("node_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{repo_full_name}#{number}"));

    store.push_webhook_queue_entry(WebhookQueueEntry {
        item_id,
        repo: RepoRef::new(owner, name),
        number,
        reason: WebhookQueueReason::Webhook,
        enqueued_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runner_webhook::sign;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn state() -> Arc<WebhookState> {
        let dir = tempdir().unwrap();
        Arc::new(WebhookState {
            secret: b"test-secret".to_vec(),
            store: Store::new(dir.path().to_path_buf()),
            path: "/webhook".to_string(),
        })
    }

    fn config() -> WebhookConfig {
        WebhookConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            path: "/webhook".to_string(),
            secret: Some("test-secret".to_string()),
            secret_env: None,
            max_payload_bytes: 1024 * 1024,
            queue_file: None,
            catchup: Default::default(),
        }
    }

    #[tokio::test]
    async fn rejects_bad_signature_with_401() {
        let state = state();
        let app = router(state, &config());
        let body = br#"{"action":"opened"}"#;
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-GitHub-Event", "issues")
            .header(SIGNATURE_HEADER, "sha256=deadbeef")
            .body(Body::from(body.to_vec()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepts_correctly_signed_supported_event() {
        let state = state();
        let app = router(state, &config());
        let body = br#"{"action":"opened","repository":{"full_name":"acme/widgets"},"issue":{"number":7,"node_id":"i7"}}"#;
        let signature = sign(b"test-secret", body);
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-GitHub-Event", "issues")
            .header("X-GitHub-Delivery", "d1")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.to_vec()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ignores_unsupported_event_types() {
        let state = state();
        let app = router(state, &config());
        let body = br#"{}"#;
        let signature = sign(b"test-secret", body);
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-GitHub-Event", "star")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.to_vec()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
