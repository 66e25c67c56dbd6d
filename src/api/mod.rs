//! HTTP surface of the detection service

pub mod routes;

use crate::error::DetectionError;
use crate::metrics::DetectionMetrics;
use crate::models::InferenceEngine;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared request context
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<InferenceEngine>,
    pub metrics: Arc<DetectionMetrics>,
}

impl AppState {
    pub fn new(engine: Arc<InferenceEngine>, metrics: Arc<DetectionMetrics>) -> Self {
        Self { engine, metrics }
    }
}

/// Router options taken from the server configuration
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        let server = crate::config::ServerConfig::default();
        Self {
            max_upload_bytes: server.max_upload_bytes,
            cors_origins: server.cors_origins,
        }
    }
}

/// Build the API router
pub fn build_router(state: AppState, options: &RouterOptions) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/api/detect", post(routes::detect))
        .route("/api/detect_csv", post(routes::detect_csv))
        .route("/api/stats", get(routes::stats))
        .layer(DefaultBodyLimit::max(options.max_upload_bytes))
        .layer(cors_layer(&options.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_columns: Option<Vec<String>>,
}

/// A `DetectionError` bound to the status code its endpoint reports
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: DetectionError,
    detail: String,
}

impl ApiError {
    /// Single-record failures are all reported as server errors
    pub fn inference(error: DetectionError) -> Self {
        let detail = format!("Inference failed: {}", error);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error,
            detail,
        }
    }

    /// Batch failures split into client validation errors and server errors
    pub fn batch(error: DetectionError) -> Self {
        if error.is_validation() {
            Self {
                status: StatusCode::BAD_REQUEST,
                detail: error.to_string(),
                error,
            }
        } else {
            Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                detail: format!("Error processing CSV: {}", error),
                error,
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.detail,
            missing_columns: self.error.missing_columns().map(<[String]>::to_vec),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests;
