//! Saga instance inspection.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use common::CorrelationId;
use saga_store::{SagaRecord, SagaStore};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

/// Default idle threshold for the stuck query, in seconds.
pub const DEFAULT_STUCK_AFTER_SECS: i64 = 15 * 60;

#[derive(Deserialize)]
pub struct StuckQuery {
    pub older_than_secs: Option<i64>,
}

#[derive(Serialize)]
pub struct SagaResponse {
    pub correlation_id: String,
    pub saga_type: String,
    pub state: String,
    pub data: serde_json::Value,
    pub failure_reason: Option<String>,
    pub timeout_pending: bool,
    pub milestones: BTreeMap<String, DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub idle_secs: i64,
    pub version: i64,
}

impl SagaResponse {
    fn from_record(record: SagaRecord, now: DateTime<Utc>) -> Self {
        Self {
            idle_secs: record.idle_for(now).num_seconds(),
            correlation_id: record.correlation_id.to_string(),
            saga_type: record.saga_type,
            state: record.state,
            data: record.data,
            failure_reason: record.failure_reason,
            timeout_pending: record.pending_timeout.is_some(),
            milestones: record.milestones,
            started_at: record.started_at,
            updated_at: record.updated_at,
            version: record.version.as_i64(),
        }
    }
}

/// GET /sagas/{id}: returns one instance.
pub async fn get<S: SagaStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let correlation_id = CorrelationId::parse(&id)
        .map_err(|_| ApiError::BadRequest(format!("Invalid correlation ID: {id}")))?;

    let record = state
        .store
        .load(correlation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {correlation_id} not found")))?;

    Ok(Json(SagaResponse::from_record(record, Utc::now())))
}

/// GET /sagas/stuck: lists non-terminal instances idle for longer than
/// `older_than_secs`, longest idle first.
pub async fn stuck<S: SagaStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<StuckQuery>,
) -> Result<Json<Vec<SagaResponse>>, ApiError> {
    let secs = query.older_than_secs.unwrap_or(DEFAULT_STUCK_AFTER_SECS);
    if secs < 0 {
        return Err(ApiError::BadRequest(
            "older_than_secs must not be negative".to_string(),
        ));
    }

    let now = Utc::now();
    let records = state
        .router
        .find_stuck(chrono::Duration::seconds(secs))
        .await?;

    Ok(Json(
        records
            .into_iter()
            .map(|r| SagaResponse::from_record(r, now))
            .collect(),
    ))
}
