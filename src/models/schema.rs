//! Feature schema the classifier was trained against

use crate::types::record::{is_categorical_column, CATEGORICAL_COLUMNS};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Shape of the feature vector a deployment serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVariant {
    /// Raw fields; categorical encoding happens inside the classifier stage
    Simple,
    /// Categorical fields already expanded into one indicator column per value
    OneHot,
}

/// Where an aligned field's value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    Numeric,
    Categorical,
    /// Indicator column for `column == value`
    OneHot { column: String, value: String },
}

/// On-disk schema formats: a described object, or a bare list of feature
/// names as written by the training script (implies `one_hot`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SchemaArtifact {
    Described {
        variant: SchemaVariant,
        features: Vec<String>,
        #[serde(default)]
        categories: BTreeMap<String, Vec<String>>,
    },
    Names(Vec<String>),
}

/// Immutable ordered feature schema plus recorded category vocabularies
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    variant: SchemaVariant,
    fields: Vec<String>,
    sources: Vec<FieldSource>,
    categories: BTreeMap<String, Vec<String>>,
    required_columns: Vec<String>,
}

impl FeatureSchema {
    /// Build and validate a schema
    pub fn new(
        variant: SchemaVariant,
        fields: Vec<String>,
        mut categories: BTreeMap<String, Vec<String>>,
    ) -> Result<Self> {
        if fields.is_empty() {
            bail!("feature schema has no fields");
        }

        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.as_str()) {
                bail!("feature schema lists '{}' more than once", field);
            }
        }

        if variant == SchemaVariant::OneHot {
            // Indicator columns carry their own vocabulary
            for field in &fields {
                if let Some((column, value)) = split_one_hot(field) {
                    let vocabulary = categories.entry(column.to_string()).or_default();
                    if !vocabulary.iter().any(|v| v == value) {
                        vocabulary.push(value.to_string());
                    }
                }
            }
        }

        let mut sources = Vec::with_capacity(fields.len());
        for field in &fields {
            let source = match variant {
                SchemaVariant::Simple if is_categorical_column(field) => {
                    match categories.get(field.as_str()) {
                        Some(vocabulary) if !vocabulary.is_empty() => FieldSource::Categorical,
                        _ => bail!("simple schema has no recorded categories for '{}'", field),
                    }
                }
                SchemaVariant::Simple => FieldSource::Numeric,
                SchemaVariant::OneHot if is_categorical_column(field) => {
                    bail!("one-hot schema must not contain raw categorical column '{}'", field)
                }
                SchemaVariant::OneHot => match split_one_hot(field) {
                    Some((column, value)) => FieldSource::OneHot {
                        column: column.to_string(),
                        value: value.to_string(),
                    },
                    None => FieldSource::Numeric,
                },
            };
            sources.push(source);
        }

        let mut required_columns: Vec<String> = Vec::new();
        for (field, source) in fields.iter().zip(&sources) {
            let column = match source {
                FieldSource::OneHot { column, .. } => column,
                _ => field,
            };
            if !required_columns.contains(column) {
                required_columns.push(column.clone());
            }
        }

        Ok(Self {
            variant,
            fields,
            sources,
            categories,
            required_columns,
        })
    }

    /// Parse a schema artifact
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let artifact: SchemaArtifact =
            serde_json::from_slice(bytes).context("Schema artifact is not valid JSON")?;

        match artifact {
            SchemaArtifact::Described {
                variant,
                features,
                categories,
            } => Self::new(variant, features, categories),
            SchemaArtifact::Names(features) => {
                Self::new(SchemaVariant::OneHot, features, BTreeMap::new())
            }
        }
    }

    /// Load a schema artifact from disk
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read schema from {}", path.display()))?;
        Self::from_json_slice(&bytes)
            .with_context(|| format!("Failed to load schema from {}", path.display()))
    }

    pub fn variant(&self) -> SchemaVariant {
        self.variant
    }

    /// Field names in classifier order
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Per-field value source, parallel to `fields()`
    pub fn sources(&self) -> &[FieldSource] {
        &self.sources
    }

    /// Recorded vocabulary of a categorical column
    pub fn categories(&self, column: &str) -> Option<&[String]> {
        self.categories.get(column).map(Vec::as_slice)
    }

    /// Raw input columns a caller must supply, in schema order
    pub fn required_columns(&self) -> &[String] {
        &self.required_columns
    }

    /// Whether `column` is an accepted raw input column
    pub fn accepts_column(&self, column: &str) -> bool {
        self.required_columns.iter().any(|c| c == column)
            || self.fields.iter().any(|f| f == column)
    }
}

/// Split `protocol_type_tcp` into `("protocol_type", "tcp")`
fn split_one_hot(field: &str) -> Option<(&'static str, &str)> {
    CATEGORICAL_COLUMNS.iter().find_map(|column| {
        field
            .strip_prefix(column)
            .and_then(|rest| rest.strip_prefix('_'))
            .filter(|value| !value.is_empty())
            .map(|value| (*column, value))
    })
}
