//! HTTP surface: batch intake, health probes and metrics.
//!
//! Request decoding and per-record validation live here; nothing malformed
//! reaches the [`Dispatcher`].

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::health::{ErrorTracker, HealthChecker};
use crate::metrics::IngestMetrics;
use crate::model::{HealthReport, IngestResponse, RawRecord, RejectedRecord};
use crate::pipeline::Dispatcher;
use crate::Error;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub health: Arc<HealthChecker>,
    pub metrics: Arc<IngestMetrics>,
    pub tracker: Arc<ErrorTracker>,
}

/// Error body returned to HTTP callers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::QueueClosed | Error::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/data", post(ingest_data))
        .route("/health", get(health))
        .route("/ready", get(health))
        .with_state(state)
}

pub fn build_metrics_router(metrics: Arc<IngestMetrics>) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let metrics = metrics.clone();
            async move { render_metrics(&metrics) }
        }),
    )
}

fn render_metrics(metrics: &IngestMetrics) -> Response {
    match metrics.render() {
        Ok(text) => text.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Accepts a JSON array of records.
///
/// Each element is decoded on its own so one malformed record does not
/// reject the batch. The response is sent once every valid record has been
/// enqueued, not once it has been published.
async fn ingest_data(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    let elements: Vec<Value> = serde_json::from_slice(&body).map_err(|e| {
        state.tracker.report("parse batch", &e);
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: "Error parsing input array".to_string(),
        }
    })?;

    info!(records = elements.len(), "Ingest batch");

    let mut rejected = Vec::new();
    for (index, element) in elements.into_iter().enumerate() {
        let record = serde_json::from_value::<RawRecord>(element)
            .map_err(|e| Error::Validation(e.to_string()))
            .and_then(|record| record.validate().map(|_| record));

        match record {
            Ok(record) => state.dispatcher.enqueue(record).await?,
            Err(e) => {
                state.metrics.records_rejected.inc();
                state.tracker.report("decode record", &e);
                rejected.push(RejectedRecord {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }

    debug!(rejected = rejected.len(), "Batch enqueued");
    Ok(Json(IngestResponse {
        received: true,
        rejected,
    }))
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthReport>, ApiError> {
    let report = state.health.check().await.map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: e.to_string(),
    })?;
    Ok(Json(report))
}
