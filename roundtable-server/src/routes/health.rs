use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Serialize;
use tracing::warn;

use crate::{app_state::AppState, services::buffer_store::BufferStore};

const READINESS_PROBE_KEY: &str = "health:readyz";

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

async fn healthz() -> impl IntoResponse {
    metrics::counter!("health_checks_total", "endpoint" => "healthz", "status" => "ok")
        .increment(1);
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.get(READINESS_PROBE_KEY).await {
        Ok(_) => {
            metrics::counter!("health_checks_total", "endpoint" => "readyz", "status" => "ok")
                .increment(1);
            (StatusCode::OK, Json(HealthResponse { status: "ready" }))
        }
        Err(err) => {
            warn!(error = %err, "buffer store readiness probe failed");
            metrics::counter!(
                "health_checks_total",
                "endpoint" => "readyz",
                "status" => "error"
            )
            .increment(1);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse { status: "degraded" }),
            )
        }
    }
}

pub fn create_health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{buffer_store::InMemoryBufferStore, stream_supervisor::StreamSupervisor};
    use axum::{body::Body, http::Request};
    use shared::config::server::{Config, Profile};
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::in_memory(Arc::new(Config::default_for_profile(
            Profile::Test,
        ))))
    }

    async fn status_of(state: Arc<AppState>, uri: &str) -> StatusCode {
        create_health_router()
            .with_state(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        assert_eq!(status_of(state(), "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_returns_ready_when_store_answers() {
        assert_eq!(status_of(state(), "/readyz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_degrades_when_store_fails() {
        let store = Arc::new(InMemoryBufferStore::new());
        // A list under the probe key makes `get` fail.
        store
            .append(READINESS_PROBE_KEY, "x".into(), None)
            .await
            .unwrap();
        let state = Arc::new(AppState::new(
            Arc::new(Config::default_for_profile(Profile::Test)),
            store,
            Arc::new(StreamSupervisor::new(None)),
        ));

        assert_eq!(
            status_of(state, "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
