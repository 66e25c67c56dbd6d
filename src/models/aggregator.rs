//! Aggregate statistics over scored batch rows

use crate::types::result::BatchRow;

/// Totals reported alongside batch results
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub threats: usize,
    pub safe: usize,
    pub avg_probability: f64,
}

impl BatchSummary {
    /// Summarize scored rows. An empty batch averages to 0.
    pub fn from_rows(rows: &[BatchRow]) -> Self {
        let total = rows.len();
        let threats = rows.iter().filter(|row| row.is_threat == 1).count();
        let avg_probability = mean(rows.iter().map(|row| row.threat_probability));

        Self {
            total,
            threats,
            safe: total - threats,
            avg_probability,
        }
    }
}

/// Arithmetic mean, 0 for an empty sequence
pub fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count > 0 {
        sum / count as f64
    } else {
        0.0
    }
}
