//! HTTP surface of the auction saga engine.
//!
//! Accepts inbound messages, exposes instance inspection and stuck-saga
//! queries, and serves health and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{EngineConfig, MessageRouter};
use saga_store::SagaStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: SagaStore> {
    pub store: S,
    pub router: Arc<MessageRouter>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SagaStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::health::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/messages", post(routes::messages::receive::<S>))
        .route("/sagas/stuck", get(routes::sagas::stuck::<S>))
        .route("/sagas/{id}", get(routes::sagas::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state with every auction workflow registered.
///
/// Fails if a workflow definition does not validate.
pub fn create_state<S: SagaStore + Clone + 'static>(
    store: S,
    config: &EngineConfig,
) -> saga::Result<Arc<AppState<S>>> {
    let router = Arc::new(workflows::router(store.clone(), config)?);
    Ok(Arc::new(AppState { store, router }))
}
