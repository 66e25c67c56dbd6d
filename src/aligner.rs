//! Schema alignment of caller input.
//!
//! Single records are aligned strictly: every required field must be present
//! with the right type. Tables are aligned permissively: once all required
//! columns exist, numeric cells that fail to parse are replaced with 0 and
//! the replacement is reported as a row warning instead of an error.

use crate::error::DetectionError;
use crate::models::schema::{FeatureSchema, FieldSource};
use crate::table::Table;
use crate::types::record::{AlignedRecord, FeatureValue, RawRecord};
use std::sync::Arc;

/// Rows of a table in schema order, with coercion warnings per row
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlignedTable {
    pub rows: Vec<AlignedRecord>,
    pub warnings: Vec<Vec<String>>,
}

impl AlignedTable {
    /// Number of cells replaced with 0
    pub fn coerced_cells(&self) -> usize {
        self.warnings.iter().map(Vec::len).sum()
    }
}

/// Reconciles caller input with the active feature schema
#[derive(Debug, Clone)]
pub struct SchemaAligner {
    schema: Arc<FeatureSchema>,
}

impl SchemaAligner {
    pub fn new(schema: Arc<FeatureSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Align one record. Missing, unknown, or mistyped fields are rejected.
    pub fn align_record(&self, record: &RawRecord) -> Result<AlignedRecord, DetectionError> {
        let unknown: Vec<&str> = record
            .field_names()
            .filter(|name| !self.schema.accepts_column(name))
            .collect();
        if !unknown.is_empty() {
            return Err(DetectionError::Schema(format!(
                "unknown fields: {}",
                unknown.join(", ")
            )));
        }

        let mut missing: Vec<&str> = Vec::new();
        let mut values = Vec::with_capacity(self.schema.len());

        for (field, source) in self.schema.fields().iter().zip(self.schema.sources()) {
            let value = match source {
                FieldSource::Numeric => match record.get(field) {
                    Some(value) => FeatureValue::Numeric(expect_number(field, value)?),
                    None => {
                        missing.push(field);
                        continue;
                    }
                },
                FieldSource::Categorical => match record.get(field) {
                    Some(FeatureValue::Categorical(s)) => FeatureValue::Categorical(s.clone()),
                    Some(FeatureValue::Numeric(_)) => {
                        return Err(DetectionError::Schema(format!(
                            "field '{field}' expects a string"
                        )))
                    }
                    None => {
                        missing.push(field);
                        continue;
                    }
                },
                FieldSource::OneHot { column, value } => {
                    if let Some(existing) = record.get(field) {
                        FeatureValue::Numeric(expect_number(field, existing)?)
                    } else {
                        match record.get(column) {
                            Some(FeatureValue::Categorical(s)) => {
                                FeatureValue::Numeric(if s == value { 1.0 } else { 0.0 })
                            }
                            Some(FeatureValue::Numeric(_)) => {
                                return Err(DetectionError::Schema(format!(
                                    "field '{column}' expects a string"
                                )))
                            }
                            None => {
                                if !missing.contains(&column.as_str()) {
                                    missing.push(column);
                                }
                                continue;
                            }
                        }
                    }
                }
            };
            values.push(value);
        }

        if !missing.is_empty() {
            return Err(DetectionError::Schema(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        Ok(AlignedRecord::new(values))
    }

    /// Align every row of a table.
    ///
    /// Fails only when required columns are absent; the error lists all of
    /// them in schema order.
    pub fn align_table(&self, table: &Table) -> Result<AlignedTable, DetectionError> {
        let missing = self.missing_columns(table);
        if !missing.is_empty() {
            return Err(DetectionError::MissingColumns(missing));
        }

        let plan: Vec<CellPlan> = self
            .schema
            .fields()
            .iter()
            .zip(self.schema.sources())
            .map(|(field, source)| CellPlan::resolve(table, field, source))
            .collect();

        let mut aligned = AlignedTable {
            rows: Vec::with_capacity(table.row_count()),
            warnings: Vec::with_capacity(table.row_count()),
        };

        for row in table.rows() {
            let mut warnings = Vec::new();
            let values = plan
                .iter()
                .map(|cell| cell.value(row, &mut warnings))
                .collect();
            aligned.rows.push(AlignedRecord::new(values));
            aligned.warnings.push(warnings);
        }

        Ok(aligned)
    }

    /// Required raw columns the table lacks. A one-hot source column also
    /// counts as present when the table already carries all of its indicator
    /// columns.
    pub fn missing_columns(&self, table: &Table) -> Vec<String> {
        self.schema
            .required_columns()
            .iter()
            .filter(|column| !table.has_column(column))
            .filter(|column| !self.indicators_present(table, column))
            .cloned()
            .collect()
    }

    fn indicators_present(&self, table: &Table, column: &str) -> bool {
        let mut indicators = self
            .schema
            .fields()
            .iter()
            .zip(self.schema.sources())
            .filter(|(_, source)| matches!(source, FieldSource::OneHot { column: c, .. } if c == column))
            .peekable();

        indicators.peek().is_some() && indicators.all(|(field, _)| table.has_column(field))
    }
}

/// How one schema field is read from a table row
enum CellPlan<'a> {
    Number { index: usize, column: &'a str },
    Text { index: usize },
    Indicator { index: usize, value: &'a str },
}

impl<'a> CellPlan<'a> {
    /// `missing_columns` must be empty before resolving
    fn resolve(table: &Table, field: &'a str, source: &'a FieldSource) -> Self {
        let index_of = |name: &str| table.column_index(name).unwrap_or_default();
        match source {
            FieldSource::Numeric => CellPlan::Number {
                index: index_of(field),
                column: field,
            },
            FieldSource::Categorical => CellPlan::Text {
                index: index_of(field),
            },
            FieldSource::OneHot { column, value } => match table.column_index(field) {
                Some(index) => CellPlan::Number {
                    index,
                    column: field,
                },
                None => CellPlan::Indicator {
                    index: index_of(column),
                    value,
                },
            },
        }
    }

    fn value(&self, row: &[String], warnings: &mut Vec<String>) -> FeatureValue {
        match self {
            CellPlan::Number { index, column } => {
                let cell = &row[*index];
                FeatureValue::Numeric(coerce_number(cell).unwrap_or_else(|| {
                    warnings.push(format!("{column}: '{cell}' coerced to 0"));
                    0.0
                }))
            }
            CellPlan::Text { index } => FeatureValue::Categorical(row[*index].clone()),
            CellPlan::Indicator { index, value } => {
                FeatureValue::Numeric(if row[*index] == *value { 1.0 } else { 0.0 })
            }
        }
    }
}

fn expect_number(field: &str, value: &FeatureValue) -> Result<f64, DetectionError> {
    match value {
        FeatureValue::Numeric(n) if n.is_finite() => Ok(*n),
        FeatureValue::Numeric(_) => Err(DetectionError::Schema(format!(
            "field '{field}' is not a finite number"
        ))),
        FeatureValue::Categorical(_) => Err(DetectionError::Schema(format!(
            "field '{field}' expects a number"
        ))),
    }
}

fn coerce_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}
