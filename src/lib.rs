//! Network Threat Detection Service Library
//!
//! Scores network-connection records for intrusion likelihood with a
//! pre-trained ONNX classifier, one record at a time or as CSV batches.

pub mod aligner;
pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod table;
pub mod types;

pub use aligner::SchemaAligner;
pub use config::AppConfig;
pub use error::DetectionError;
pub use models::inference::InferenceEngine;
pub use models::loader::ArtifactLoader;
pub use types::{record::ConnectionRecord, result::InferenceResult, result::RiskLevel};
