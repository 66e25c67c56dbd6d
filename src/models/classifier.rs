//! Classifier abstraction shared by the single-record and batch paths

use crate::types::record::AlignedRecord;
use anyhow::Result;

/// Output of the classifier for one aligned row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Predicted class (1 = attack)
    pub label: u8,
    /// Probability of the attack class
    pub probability: f64,
}

/// A trained binary classifier over schema-aligned rows.
///
/// Implementations score many rows in one call; the engine never loops
/// over rows itself.
pub trait Classifier: Send + Sync {
    /// Human readable identifier used in logs
    fn name(&self) -> &str;

    /// Label and attack probability for each row, in input order
    fn score(&self, rows: &[AlignedRecord]) -> Result<Vec<Prediction>>;

    fn predict(&self, rows: &[AlignedRecord]) -> Result<Vec<u8>> {
        Ok(self.score(rows)?.into_iter().map(|p| p.label).collect())
    }

    fn predict_proba(&self, rows: &[AlignedRecord]) -> Result<Vec<f64>> {
        Ok(self.score(rows)?.into_iter().map(|p| p.probability).collect())
    }
}
