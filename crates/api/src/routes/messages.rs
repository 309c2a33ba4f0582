//! Message ingress.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use saga::{InboundMessage, Outcome};
use saga_store::SagaStore;

use crate::AppState;
use crate::error::ApiError;

/// POST /messages: routes a `{"type", "data"}` message to its workflow and
/// returns the processing outcome.
///
/// Absorbed messages (duplicates, late replies, stale timeouts) answer
/// 200 with `"outcome": "ignored"` so that the sender does not redeliver.
pub async fn receive<S: SagaStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(message): Json<InboundMessage>,
) -> Result<Json<Outcome>, ApiError> {
    let outcome = state.router.route(message).await?;
    Ok(Json(outcome))
}
