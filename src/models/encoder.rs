//! Preprocessing stage bundled with the classifier: turns aligned rows into
//! the dense `f32` matrix the ONNX graph consumes.

use crate::models::schema::{FeatureSchema, FieldSource};
use crate::types::record::{AlignedRecord, FeatureValue};
use anyhow::{bail, Result};

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    /// Numeric value copied as-is
    Value,
    /// Categorical value expanded over a recorded vocabulary; unseen values
    /// encode as all zeros
    Expand(Vec<String>),
}

/// Encodes aligned rows into model input columns
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureEncoder {
    slots: Vec<Slot>,
    width: usize,
}

impl FeatureEncoder {
    pub fn from_schema(schema: &FeatureSchema) -> Result<Self> {
        let mut slots = Vec::with_capacity(schema.len());
        for (field, source) in schema.fields().iter().zip(schema.sources()) {
            let slot = match source {
                FieldSource::Numeric | FieldSource::OneHot { .. } => Slot::Value,
                FieldSource::Categorical => match schema.categories(field) {
                    Some(vocabulary) => Slot::Expand(vocabulary.to_vec()),
                    None => bail!("no recorded categories for '{}'", field),
                },
            };
            slots.push(slot);
        }

        let width = slots
            .iter()
            .map(|slot| match slot {
                Slot::Value => 1,
                Slot::Expand(vocabulary) => vocabulary.len(),
            })
            .sum();

        Ok(Self { slots, width })
    }

    /// Number of model input columns per row
    pub fn width(&self) -> usize {
        self.width
    }

    /// Row-major `[rows.len(), width]` matrix
    pub fn encode(&self, rows: &[AlignedRecord]) -> Result<Vec<f32>> {
        let mut data = Vec::with_capacity(rows.len() * self.width);

        for (index, row) in rows.iter().enumerate() {
            if row.len() != self.slots.len() {
                bail!(
                    "row {} has {} values, schema expects {}",
                    index + 1,
                    row.len(),
                    self.slots.len()
                );
            }

            for (slot, value) in self.slots.iter().zip(row.values()) {
                match (slot, value) {
                    (Slot::Value, FeatureValue::Numeric(n)) => data.push(*n as f32),
                    (Slot::Expand(vocabulary), FeatureValue::Categorical(s)) => {
                        data.extend(vocabulary.iter().map(|v| if v == s { 1.0 } else { 0.0 }));
                    }
                    (Slot::Value, FeatureValue::Categorical(s)) => {
                        bail!("row {}: expected a number, got '{}'", index + 1, s)
                    }
                    (Slot::Expand(_), FeatureValue::Numeric(n)) => {
                        bail!("row {}: expected a category, got {}", index + 1, n)
                    }
                }
            }
        }

        Ok(data)
    }
}
