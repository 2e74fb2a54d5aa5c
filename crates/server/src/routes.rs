//! Registry HTTP routes.
//!
//! - `POST /api/push/subscribe`: register a push subscription
//! - `GET /healthz`: liveness probe

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::routing::{get, post};
use axum::{Json, Router};
use larder_core::{Error, RegisterRequest, SubscriptionRegistry};
use serde_json::{Value, json};

use crate::error::ApiError;

/// Shared state for the registry handlers.
#[derive(Clone)]
pub struct AppState {
    registry: SubscriptionRegistry,
    token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(registry: SubscriptionRegistry, token: Option<&str>) -> Self {
        Self { registry, token: token.map(Arc::from) }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Error> {
        let Some(expected) = self.token.as_deref() else {
            return Ok(());
        };

        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        match presented {
            Some(token) if token_matches(token.as_bytes(), expected.as_bytes()) => Ok(()),
            Some(_) => Err(Error::Unauthorized("invalid bearer token".into())),
            None => Err(Error::Unauthorized("missing bearer token".into())),
        }
    }
}

/// Compare tokens without short-circuiting on the first differing byte.
fn token_matches(presented: &[u8], expected: &[u8]) -> bool {
    presented.len() == expected.len() && presented.iter().zip(expected).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/push/subscribe", post(subscribe_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

async fn subscribe_handler(
    State(state): State<AppState>, headers: HeaderMap, payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&headers)?;
    let Json(request) = payload?;

    state.registry.register(request).await?;
    Ok(Json(json!({ "success": true })))
}

async fn healthz_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::RegistryDb;
    use reqwest::StatusCode;

    async fn spawn(token: Option<&str>) -> (String, SubscriptionRegistry) {
        let db = RegistryDb::open_in_memory().await.unwrap();
        db.add_user("alice").await.unwrap();
        let registry = SubscriptionRegistry::new(db);
        let app = build_router(AppState::new(registry.clone(), token));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), registry)
    }

    fn payload() -> Value {
        json!({
            "endpoint": "https://push.test/e1",
            "keys": {"p256dh": "BPk", "auth": "a1"},
            "username": "alice"
        })
    }

    #[tokio::test]
    async fn test_subscribe_success() {
        let (base, registry) = spawn(None).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/api/push/subscribe"))
            .json(&payload())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"success": true}));

        let stored = registry.get("https://push.test/e1").await.unwrap().unwrap();
        assert!(stored.user_id.is_some());
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (base, registry) = spawn(None).await;
        let client = reqwest::Client::new();

        for _ in 0..2 {
            let response = client
                .post(format!("{base}/api/push/subscribe"))
                .json(&payload())
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(registry.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_username_still_succeeds() {
        let (base, registry) = spawn(None).await;
        let mut body = payload();
        body["username"] = json!("mallory");

        let response = reqwest::Client::new()
            .post(format!("{base}/api/push/subscribe"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stored = registry.get("https://push.test/e1").await.unwrap().unwrap();
        assert!(stored.user_id.is_none());
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_bad_request() {
        let (base, registry) = spawn(None).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/api/push/subscribe"))
            .json(&json!({"keys": {"auth": "a1"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "endpoint is required");
        assert_eq!(registry.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let (base, _) = spawn(None).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/api/push/subscribe"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_token_required_when_configured() {
        let (base, registry) = spawn(Some("s3cret")).await;
        let client = reqwest::Client::new();
        let url = format!("{base}/api/push/subscribe");

        let missing = client.post(&url).json(&payload()).send().await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = client
            .post(&url)
            .bearer_auth("nope")
            .json(&payload())
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(registry.count().await.unwrap(), 0);

        let ok = client
            .post(&url)
            .bearer_auth("s3cret")
            .json(&payload())
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(registry.count().await.unwrap(), 1);
    }

    #[test]
    fn test_token_matches() {
        assert!(token_matches(b"s3cret", b"s3cret"));
        assert!(!token_matches(b"s3creT", b"s3cret"));
        assert!(!token_matches(b"s3cre", b"s3cret"));
        assert!(!token_matches(b"", b"s3cret"));
    }

    #[tokio::test]
    async fn test_healthz() {
        let (base, _) = spawn(None).await;
        let response = reqwest::get(format!("{base}/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "ok");
    }
}
