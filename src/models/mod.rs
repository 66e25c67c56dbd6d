//! Classifier, schema and inference components

pub mod aggregator;
pub mod classifier;
pub mod encoder;
pub mod inference;
pub mod loader;
pub mod onnx;
pub mod schema;

pub use aggregator::BatchSummary;
pub use classifier::{Classifier, Prediction};
pub use inference::InferenceEngine;
pub use loader::{ArtifactBundle, ArtifactLoader};
pub use schema::{FeatureSchema, SchemaVariant};
