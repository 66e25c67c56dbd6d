//! Request handlers

use super::{ApiError, AppState};
use crate::error::DetectionError;
use crate::metrics::MetricsSnapshot;
use crate::types::result::{BatchResult, InferenceResult};
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Multipart field carrying the uploaded table
const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: String,
    pub model_loaded: bool,
    pub features: Vec<String>,
}

/// Service info and the active feature list
pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: "Network Threat Detection API is running".to_string(),
        model_loaded: true,
        features: state.engine.schema().fields().to_vec(),
    })
}

/// Score a single connection record
pub async fn detect(
    State(state): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<InferenceResult>, ApiError> {
    let start = Instant::now();

    let outcome = match body {
        Ok(Json(body)) => {
            let engine = state.engine.clone();
            run_blocking(move || engine.detect_json(body)).await
        }
        Err(rejection) => Err(DetectionError::Schema(rejection.body_text())),
    };

    match outcome {
        Ok(result) => {
            state.metrics.record_single(&result, start.elapsed());
            Ok(Json(result))
        }
        Err(e) => {
            warn!(error = %e, "Single-record inference failed");
            state.metrics.record_failure(&e);
            Err(ApiError::inference(e))
        }
    }
}

/// Score every row of an uploaded CSV file
pub async fn detect_csv(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchResult>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::new_v4();

    let outcome = match read_upload(multipart).await {
        Ok((file_name, content)) => {
            info!(
                request_id = %request_id,
                file = %file_name,
                bytes = content.len(),
                "CSV upload received"
            );
            let engine = state.engine.clone();
            run_blocking(move || engine.detect_upload(&file_name, &content)).await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(result) => {
            info!(
                request_id = %request_id,
                total = result.total,
                threats = result.threats,
                avg_probability = result.avg_probability,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "CSV scored"
            );
            state.metrics.record_batch(&result, start.elapsed());
            Ok(Json(result))
        }
        Err(e) => {
            if e.is_validation() {
                warn!(request_id = %request_id, error = %e, "CSV upload rejected");
            } else {
                error!(request_id = %request_id, error = %e, "CSV inference failed");
            }
            state.metrics.record_failure(&e);
            Err(ApiError::batch(e))
        }
    }
}

/// Operational counters
pub async fn stats(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Pull the `file` field out of a multipart body
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(String, Vec<u8>), DetectionError> {
    let mut multipart = multipart.map_err(|e| DetectionError::InvalidUpload(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DetectionError::InvalidUpload(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let content = field
            .bytes()
            .await
            .map_err(|e| DetectionError::InvalidUpload(e.body_text()))?;
        return Ok((file_name, content.to_vec()));
    }

    Err(DetectionError::MissingUpload)
}

/// Classifier calls are CPU bound; keep them off the async workers
async fn run_blocking<T, F>(task: F) -> Result<T, DetectionError>
where
    F: FnOnce() -> Result<T, DetectionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| DetectionError::Classifier(format!("scoring task failed: {}", e)))?
}
