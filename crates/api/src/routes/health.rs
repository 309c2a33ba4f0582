//! Liveness and Prometheus metrics endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use saga_store::SagaStore;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub workflows: Vec<&'static str>,
}

/// GET /health: reports liveness and the registered workflows.
pub async fn check<S: SagaStore>(State(state): State<Arc<AppState<S>>>) -> Json<HealthResponse> {
    let workflows = state
        .router
        .handlers()
        .iter()
        .map(|h| h.saga_type())
        .collect();
    Json(HealthResponse {
        status: "ok",
        workflows,
    })
}

/// GET /metrics: renders Prometheus metrics.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
