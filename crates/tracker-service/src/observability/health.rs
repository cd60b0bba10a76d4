//! Health endpoints for the Tracker Service
//!
//! - `GET /health` - Liveness probe, reports the instance id
//! - `GET /ready` - Readiness probe: 200 while the tracker runtime's GC loop
//!   is running, 503 before it starts and once shutdown has begun
//!
//! The `/metrics` endpoint is served separately via `metrics-exporter-prometheus`.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness of this instance.
#[derive(Debug)]
pub struct HealthState {
    instance_id: String,
    ready: AtomicBool,
}

impl HealthState {
    /// Create a new health state (not ready).
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the instance as accepting start/stop calls.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the instance as draining.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Whether the instance is accepting start/stop calls.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Identifier of this instance.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

#[derive(Debug, Serialize)]
struct LivenessBody {
    status: &'static str,
    instance_id: String,
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> Json<LivenessBody> {
    Json(LivenessBody {
        status: "alive",
        instance_id: state.instance_id().to_string(),
    })
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");
        app.oneshot(request)
            .await
            .expect("Failed to execute request")
            .status()
    }

    #[test]
    fn test_health_state_transitions() {
        let state = HealthState::new("ts-test");
        assert!(!state.is_ready(), "Should not be ready before the runtime starts");

        state.set_ready();
        assert!(state.is_ready());

        state.set_not_ready();
        assert!(!state.is_ready(), "Should not be ready once draining");
    }

    #[tokio::test]
    async fn test_liveness_reports_instance_id() {
        let app = health_router(Arc::new(HealthState::new("ts-host-1234")));
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "alive");
        assert_eq!(json["instance_id"], "ts-host-1234");
    }

    #[tokio::test]
    async fn test_readiness_follows_state() {
        let state = Arc::new(HealthState::new("ts-test"));
        assert_eq!(
            get_status(health_router(Arc::clone(&state)), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_ready();
        assert_eq!(
            get_status(health_router(Arc::clone(&state)), "/ready").await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_unknown_path_returns_404() {
        let app = health_router(Arc::new(HealthState::new("ts-test")));
        assert_eq!(get_status(app, "/unknown").await, StatusCode::NOT_FOUND);
    }
}
