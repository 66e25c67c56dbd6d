//! Type definitions for the threat detection service

pub mod record;
pub mod result;

pub use record::{AlignedRecord, ConnectionRecord, FeatureValue, FullConnectionRecord, RawRecord, RecordInput};
pub use result::{BatchResult, BatchRow, InferenceResult, RiskLevel};
