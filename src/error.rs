//! Per-request error taxonomy

use thiserror::Error;

/// Errors surfaced by a detection request.
///
/// Validation variants are the caller's fault and are raised before the
/// classifier runs; `Schema` and `Classifier` abort the request server-side.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DetectionError {
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Uploaded file is empty")]
    EmptyUpload,

    #[error("No file was uploaded")]
    MissingUpload,

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Only CSV files are supported, got '{0}'")]
    UnsupportedFileType(String),

    #[error("Uploaded file is not valid UTF-8")]
    InvalidEncoding,

    #[error("Malformed CSV: {0}")]
    MalformedTable(String),

    #[error("Record does not match feature schema: {0}")]
    Schema(String),

    #[error("Classifier failed: {0}")]
    Classifier(String),
}

impl DetectionError {
    /// Whether the caller can fix the request and retry
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Schema(_) | Self::Classifier(_))
    }

    /// Missing column names, when this is a missing-columns rejection
    pub fn missing_columns(&self) -> Option<&[String]> {
        match self {
            Self::MissingColumns(columns) => Some(columns),
            _ => None,
        }
    }
}
