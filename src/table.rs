//! Uploaded CSV tables

use crate::error::DetectionError;
use std::collections::HashSet;

const UTF8_BOM: &str = "\u{feff}";

/// A parsed delimited table with named columns
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Build a table from parts; every row must have one cell per column
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, DetectionError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(DetectionError::MalformedTable(format!(
                    "duplicate column '{column}'"
                )));
            }
        }
        if let Some(pos) = rows.iter().position(|row| row.len() != columns.len()) {
            return Err(DetectionError::MalformedTable(format!(
                "row {} has {} fields, header has {}",
                pos + 1,
                rows[pos].len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Decode and parse raw upload bytes.
    ///
    /// Emptiness is checked before anything else, so an empty upload never
    /// reaches column validation.
    pub fn from_csv_bytes(content: &[u8]) -> Result<Self, DetectionError> {
        if content.iter().all(u8::is_ascii_whitespace) {
            return Err(DetectionError::EmptyUpload);
        }

        let text = std::str::from_utf8(content).map_err(|_| DetectionError::InvalidEncoding)?;
        let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
        if text.trim().is_empty() {
            return Err(DetectionError::EmptyUpload);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(text.as_bytes());

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| DetectionError::MalformedTable(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| DetectionError::MalformedTable(e.to_string()))?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// A row as the caller uploaded it, keyed by column name
    pub fn row_object(&self, index: usize) -> serde_json::Map<String, serde_json::Value> {
        self.columns
            .iter()
            .zip(&self.rows[index])
            .map(|(column, cell)| (column.clone(), cell_to_json(cell)))
            .collect()
    }
}

/// Integers and finite floats become numbers, blank cells become null
fn cell_to_json(cell: &str) -> serde_json::Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return serde_json::Value::Null;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return serde_json::Value::from(int);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(cell.to_string()))
}
