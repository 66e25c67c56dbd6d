//! Model artifact loader.
//!
//! Ensures the classifier and feature schema are present in the local cache
//! (downloading them when a remote location is configured), then deserializes
//! both. Every failure here is fatal to startup.

use crate::config::ArtifactsConfig;
use crate::models::classifier::Classifier;
use crate::models::encoder::FeatureEncoder;
use crate::models::onnx::OnnxClassifier;
use crate::models::schema::FeatureSchema;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The process-wide, read-only artifacts
pub struct ArtifactBundle {
    pub classifier: Arc<dyn Classifier>,
    pub schema: Arc<FeatureSchema>,
    pub loaded_at: DateTime<Utc>,
}

/// Loader for the classifier and schema artifacts
pub struct ArtifactLoader {
    config: ArtifactsConfig,
    http: reqwest::Client,
}

impl ArtifactLoader {
    pub fn new(config: ArtifactsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    /// Make both artifacts resident
    pub async fn load(&self) -> Result<ArtifactBundle> {
        let schema_path = self.config.schema_path();
        let model_path = self.config.model_path();

        self.ensure_local(&schema_path, &self.config.schema_file).await?;
        self.ensure_local(&model_path, &self.config.model_file).await?;

        let schema = FeatureSchema::from_path(&schema_path)?;
        info!(
            variant = ?schema.variant(),
            features = schema.len(),
            path = %schema_path.display(),
            "Feature schema loaded"
        );

        let classifier = self.load_classifier(&model_path, &schema)?;

        Ok(ArtifactBundle {
            classifier: Arc::new(classifier),
            schema: Arc::new(schema),
            loaded_at: Utc::now(),
        })
    }

    /// Load the ONNX graph with the preprocessing stage for `schema`
    pub fn load_classifier(&self, path: &Path, schema: &FeatureSchema) -> Result<OnnxClassifier> {
        ort::init().commit()?;

        info!(
            path = %path.display(),
            threads = self.config.onnx_threads,
            "Loading ONNX classifier"
        );

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.config.onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let encoder = FeatureEncoder::from_schema(schema)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("classifier");
        let classifier = OnnxClassifier::new(name, session, encoder);

        info!(
            model = %classifier.name(),
            input = %classifier.input_name(),
            output = %classifier.probability_output(),
            width = classifier.input_width(),
            "Classifier loaded successfully"
        );

        Ok(classifier)
    }

    /// Download `file_name` into `path` unless it already exists
    pub async fn ensure_local(&self, path: &Path, file_name: &str) -> Result<()> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }

        let Some(base_url) = self.config.remote_base_url.as_deref() else {
            bail!(
                "Artifact {} not found and no remote_base_url is configured",
                path.display()
            );
        };

        let url = artifact_url(base_url, file_name);
        let bytes = self.fetch_with_retry(&url).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Write then rename into place
        let partial = path.with_extension("partial");
        tokio::fs::write(&partial, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        tokio::fs::rename(&partial, path)
            .await
            .with_context(|| format!("Failed to move artifact into {}", path.display()))?;

        info!(url = %url, path = %path.display(), bytes = bytes.len(), "Artifact cached");
        Ok(())
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<Vec<u8>> {
        let attempts = self.config.fetch_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.fetch(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!(url = %url, attempt, attempts, error = %e, "Artifact download failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        let backoff = self.config.fetch_backoff_ms * u64::from(attempt);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("no download attempted"))
            .context(format!("Failed to download {} after {} attempts", url, attempts)))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            bail!("empty response body");
        }
        Ok(bytes.to_vec())
    }
}

fn artifact_url(base_url: &str, file_name: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), file_name)
}
