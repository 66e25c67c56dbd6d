//! Inference result data structures

use serde::{Deserialize, Serialize};

/// Risk tier derived from threat probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Lower bound of `Medium`
    pub const MEDIUM_FROM: f64 = 0.30;
    /// Lower bound of `High`
    pub const HIGH_FROM: f64 = 0.60;
    /// Lower bound of `Critical`
    pub const CRITICAL_FROM: f64 = 0.85;

    /// All tiers in ascending order
    pub const ALL: [RiskLevel; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Map a threat probability to its tier. Intervals are half-open, so a
    /// boundary value belongs to the higher tier.
    pub fn from_probability(probability: f64) -> Self {
        if probability >= Self::CRITICAL_FROM {
            RiskLevel::Critical
        } else if probability >= Self::HIGH_FROM {
            RiskLevel::High
        } else if probability >= Self::MEDIUM_FROM {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of scoring one connection record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// 1 when the classifier labels the connection as an attack
    pub is_threat: u8,
    /// Probability of the attack class (0.0 - 1.0)
    pub threat_probability: f64,
    pub risk_level: RiskLevel,
}

impl InferenceResult {
    pub fn new(is_threat: u8, threat_probability: f64) -> Self {
        Self {
            is_threat,
            threat_probability,
            risk_level: RiskLevel::from_probability(threat_probability),
        }
    }
}

/// One scored row of an uploaded table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRow {
    /// 1-based position in the upload
    pub row: usize,
    /// The row exactly as uploaded, before alignment
    pub data: serde_json::Map<String, serde_json::Value>,
    pub is_threat: u8,
    pub threat_probability: f64,
    pub risk_level: RiskLevel,
    /// Cells that were coerced to 0 while aligning this row
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Scored table with aggregate statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub total: usize,
    pub threats: usize,
    pub safe: usize,
    pub avg_probability: f64,
    pub results: Vec<BatchRow>,
}
