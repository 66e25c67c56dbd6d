//! Inference engine: the immutable context every request is served from

use crate::aligner::SchemaAligner;
use crate::error::DetectionError;
use crate::models::aggregator::BatchSummary;
use crate::models::classifier::{Classifier, Prediction};
use crate::models::loader::ArtifactBundle;
use crate::models::schema::FeatureSchema;
use crate::table::Table;
use crate::types::record::{AlignedRecord, RawRecord, RecordInput};
use crate::types::result::{BatchResult, BatchRow, InferenceResult, RiskLevel};
use std::sync::Arc;
use tracing::{debug, info};

/// Scores connection records against the loaded classifier and schema.
///
/// Built once at startup and shared read-only by all requests.
pub struct InferenceEngine {
    schema: Arc<FeatureSchema>,
    aligner: SchemaAligner,
    classifier: Arc<dyn Classifier>,
}

impl InferenceEngine {
    pub fn new(classifier: Arc<dyn Classifier>, schema: Arc<FeatureSchema>) -> Self {
        info!(
            classifier = %classifier.name(),
            variant = ?schema.variant(),
            features = schema.len(),
            "Inference engine initialized"
        );

        Self {
            aligner: SchemaAligner::new(schema.clone()),
            schema,
            classifier,
        }
    }

    pub fn from_bundle(bundle: ArtifactBundle) -> Self {
        Self::new(bundle.classifier, bundle.schema)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    /// Validate an untyped JSON body and score it
    pub fn detect_json(&self, body: serde_json::Value) -> Result<InferenceResult, DetectionError> {
        let input = RecordInput::parse(self.schema.variant(), body)?;
        self.detect(&input)
    }

    /// Score one typed record
    pub fn detect(&self, input: &RecordInput) -> Result<InferenceResult, DetectionError> {
        let mut record = input.to_raw()?;
        if let RecordInput::Full(_) = input {
            // Full records carry every NSL-KDD column; the model uses a subset
            record.retain(|name| self.schema.accepts_column(name));
        }
        self.detect_raw(&record)
    }

    /// Score one name-keyed record. All-or-nothing.
    pub fn detect_raw(&self, record: &RawRecord) -> Result<InferenceResult, DetectionError> {
        let aligned = self.aligner.align_record(record)?;
        let prediction = self.score(std::slice::from_ref(&aligned))?[0];

        let result = InferenceResult::new(prediction.label, prediction.probability);
        debug!(
            is_threat = result.is_threat,
            probability = result.threat_probability,
            risk_level = %result.risk_level,
            "Record scored"
        );
        Ok(result)
    }

    /// Score an uploaded file. The extension is checked first, then
    /// emptiness, encoding and CSV structure, all before any column check.
    pub fn detect_upload(&self, file_name: &str, content: &[u8]) -> Result<BatchResult, DetectionError> {
        if !has_csv_extension(file_name) {
            return Err(DetectionError::UnsupportedFileType(file_name.to_string()));
        }

        let table = Table::from_csv_bytes(content)?;
        self.detect_table(&table)
    }

    /// Score every row of a table with one classifier call
    pub fn detect_table(&self, table: &Table) -> Result<BatchResult, DetectionError> {
        let aligned = self.aligner.align_table(table)?;

        let predictions = if aligned.rows.is_empty() {
            Vec::new()
        } else {
            self.score(&aligned.rows)?
        };

        let results: Vec<BatchRow> = predictions
            .into_iter()
            .zip(aligned.warnings)
            .enumerate()
            .map(|(index, (prediction, warnings))| BatchRow {
                row: index + 1,
                data: table.row_object(index),
                is_threat: prediction.label,
                threat_probability: prediction.probability,
                risk_level: RiskLevel::from_probability(prediction.probability),
                warnings,
            })
            .collect();

        let summary = BatchSummary::from_rows(&results);
        debug!(
            total = summary.total,
            threats = summary.threats,
            avg_probability = summary.avg_probability,
            "Batch scored"
        );

        Ok(BatchResult {
            total: summary.total,
            threats: summary.threats,
            safe: summary.safe,
            avg_probability: summary.avg_probability,
            results,
        })
    }

    /// Run the classifier once and check its output is well formed
    fn score(&self, rows: &[AlignedRecord]) -> Result<Vec<Prediction>, DetectionError> {
        let predictions = self
            .classifier
            .score(rows)
            .map_err(|e| DetectionError::Classifier(format!("{:#}", e)))?;

        if predictions.len() != rows.len() {
            return Err(DetectionError::Classifier(format!(
                "returned {} predictions for {} rows",
                predictions.len(),
                rows.len()
            )));
        }

        for prediction in &predictions {
            if !(0.0..=1.0).contains(&prediction.probability) {
                return Err(DetectionError::Classifier(format!(
                    "probability {} is outside [0, 1]",
                    prediction.probability
                )));
            }
            if prediction.label > 1 {
                return Err(DetectionError::Classifier(format!(
                    "label {} is not binary",
                    prediction.label
                )));
            }
        }

        Ok(predictions)
    }
}

fn has_csv_extension(file_name: &str) -> bool {
    file_name.to_ascii_lowercase().ends_with(".csv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classifier::stub::StubClassifier;
    use crate::models::schema::fixtures::simple_schema;
    use crate::types::record::{ConnectionRecord, FeatureValue};

    const HEADER: &str = "protocol_type,service,flag,duration,src_bytes,dst_bytes,wrong_fragment,urgent,hot,num_failed_logins,count,logged_in";

    fn engine_with(classifier: Arc<StubClassifier>) -> InferenceEngine {
        InferenceEngine::new(classifier, Arc::new(simple_schema()))
    }

    /// Probability grows with src_bytes so rows score differently
    fn src_bytes_classifier() -> Arc<StubClassifier> {
        Arc::new(StubClassifier::with(|row| {
            let src_bytes = row.values()[4].as_numeric().unwrap_or_default();
            (src_bytes / 1000.0).min(1.0)
        }))
    }

    #[test]
    fn test_single_record_critical() {
        let classifier = Arc::new(StubClassifier::fixed(0.92));
        let engine = engine_with(classifier.clone());

        let result = engine
            .detect(&RecordInput::Simple(ConnectionRecord::sample()))
            .unwrap();

        assert_eq!(
            result,
            InferenceResult {
                is_threat: 1,
                threat_probability: 0.92,
                risk_level: RiskLevel::Critical,
            }
        );
        assert_eq!(classifier.calls(), 1);
    }

    #[test]
    fn test_single_record_from_json() {
        let engine = engine_with(Arc::new(StubClassifier::fixed(0.1)));
        let body = serde_json::to_value(ConnectionRecord::sample()).unwrap();
        let result = engine.detect_json(body).unwrap();
        assert_eq!(result.is_threat, 0);
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_single_record_schema_error_skips_classifier() {
        let classifier = Arc::new(StubClassifier::fixed(0.5));
        let engine = engine_with(classifier.clone());

        let mut record = RecordInput::Simple(ConnectionRecord::sample()).to_raw().unwrap();
        record.insert("unexpected", FeatureValue::Numeric(1.0));

        assert!(matches!(engine.detect_raw(&record), Err(DetectionError::Schema(_))));
        assert_eq!(classifier.calls(), 0);
    }

    #[test]
    fn test_single_record_classifier_failure() {
        let engine = engine_with(Arc::new(StubClassifier::failing("session poisoned")));
        let err = engine
            .detect(&RecordInput::Simple(ConnectionRecord::sample()))
            .unwrap_err();
        assert_eq!(err, DetectionError::Classifier("session poisoned".into()));
    }

    #[test]
    fn test_out_of_range_probability_is_inference_error() {
        let engine = engine_with(Arc::new(StubClassifier::fixed(f64::NAN)));
        let err = engine
            .detect(&RecordInput::Simple(ConnectionRecord::sample()))
            .unwrap_err();
        assert!(matches!(err, DetectionError::Classifier(_)));
    }

    #[test]
    fn test_batch_scores_in_one_call() {
        let classifier = src_bytes_classifier();
        let engine = engine_with(classifier.clone());
        let csv = format!(
            "{HEADER}\n\
             tcp,http,SF,0,900,300,0,0,0,0,1,1\n\
             udp,private,S0,0,100,0,0,0,0,0,5,0\n\
             tcp,ftp_data,REJ,2,650,10,0,0,1,0,2,1\n"
        );

        let result = engine.detect_upload("traffic.csv", csv.as_bytes()).unwrap();

        assert_eq!(classifier.calls(), 1);
        assert_eq!(result.total, 3);
        assert_eq!(result.threats, 2);
        assert_eq!(result.safe, 1);
        assert_eq!(result.total, result.threats + result.safe);
        assert!((result.avg_probability - (0.9 + 0.1 + 0.65) / 3.0).abs() < 1e-9);

        let rows: Vec<usize> = result.results.iter().map(|r| r.row).collect();
        assert_eq!(rows, [1, 2, 3]);
        assert_eq!(result.results[0].risk_level, RiskLevel::Critical);
        assert_eq!(result.results[1].risk_level, RiskLevel::Low);
        assert_eq!(result.results[2].risk_level, RiskLevel::High);
        assert_eq!(result.results[1].data["service"], "private");
        assert_eq!(result.results[1].data["count"], 5);
    }

    #[test]
    fn test_batch_missing_flag_is_rejected_whole() {
        let classifier = src_bytes_classifier();
        let engine = engine_with(classifier.clone());
        let header = HEADER.replace(",flag", "");
        let csv = format!(
            "{header}\n\
             tcp,http,0,900,300,0,0,0,0,1,1\n\
             udp,private,0,100,0,0,0,0,0,5,0\n\
             tcp,http,0,abc,0,0,0,0,0,5,0\n"
        );

        let err = engine.detect_upload("traffic.csv", csv.as_bytes()).unwrap_err();

        assert_eq!(err, DetectionError::MissingColumns(vec!["flag".to_string()]));
        assert!(err.is_validation());
        assert_eq!(classifier.calls(), 0);
    }

    #[test]
    fn test_batch_coerces_invalid_numeric_cell() {
        let classifier = src_bytes_classifier();
        let engine = engine_with(classifier.clone());
        let csv = format!("{HEADER}\ntcp,http,SF,N/A,200,300,0,0,0,0,1,1\ntcp,http,SF,3,400,300,0,0,0,0,1,1\n");

        let result = engine.detect_upload("traffic.CSV", csv.as_bytes()).unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.results[0].data["duration"], "N/A");
        assert_eq!(result.results[0].warnings, ["duration: 'N/A' coerced to 0"]);
        assert!((result.results[0].threat_probability - 0.2).abs() < 1e-9);
        assert!(result.results[1].warnings.is_empty());
    }

    #[test]
    fn test_batch_header_only() {
        let classifier = src_bytes_classifier();
        let engine = engine_with(classifier.clone());

        let result = engine
            .detect_upload("empty.csv", format!("{HEADER}\n").as_bytes())
            .unwrap();

        assert_eq!(result.total, 0);
        assert_eq!(result.threats + result.safe, 0);
        assert_eq!(result.avg_probability, 0.0);
        assert!(result.results.is_empty());
        assert_eq!(classifier.calls(), 0);
    }

    #[test]
    fn test_upload_validation_order() {
        let classifier = src_bytes_classifier();
        let engine = engine_with(classifier.clone());

        assert_eq!(
            engine.detect_upload("traffic.txt", b"a,b\n1,2\n").unwrap_err(),
            DetectionError::UnsupportedFileType("traffic.txt".into())
        );
        assert_eq!(
            engine.detect_upload("traffic.csv", b"").unwrap_err(),
            DetectionError::EmptyUpload
        );
        assert_eq!(
            engine.detect_upload("traffic.csv", &[0xff, 0xfe, b'\n']).unwrap_err(),
            DetectionError::InvalidEncoding
        );
        assert_eq!(classifier.calls(), 0);
    }

    const NSL_KDD_NUMERIC: [&str; 38] = [
        "duration", "src_bytes", "dst_bytes", "land", "wrong_fragment", "urgent", "hot",
        "num_failed_logins", "logged_in", "num_compromised", "root_shell", "su_attempted",
        "num_root", "num_file_creations", "num_shells", "num_access_files", "num_outbound_cmds",
        "is_host_login", "is_guest_login", "count", "srv_count", "serror_rate", "srv_serror_rate",
        "rerror_rate", "srv_rerror_rate", "same_srv_rate", "diff_srv_rate", "srv_diff_host_rate",
        "dst_host_count", "dst_host_srv_count", "dst_host_same_srv_rate", "dst_host_diff_srv_rate",
        "dst_host_same_src_port_rate", "dst_host_srv_diff_host_rate", "dst_host_serror_rate",
        "dst_host_srv_serror_rate", "dst_host_rerror_rate", "dst_host_srv_rerror_rate",
    ];

    /// Expanded schema over the given numeric columns plus a few indicators
    fn expanded_schema(numeric: &[&str]) -> Arc<FeatureSchema> {
        let mut fields: Vec<&str> = numeric.to_vec();
        fields.extend(["protocol_type_tcp", "protocol_type_udp", "service_http", "flag_SF"]);
        Arc::new(FeatureSchema::from_json_slice(&serde_json::to_vec(&fields).unwrap()).unwrap())
    }

    fn full_record_body() -> serde_json::Value {
        let mut body = serde_json::Map::new();
        for name in NSL_KDD_NUMERIC {
            body.insert(name.to_string(), serde_json::json!(0));
        }
        body.insert("src_bytes".into(), serde_json::json!(491));
        body.insert("protocol_type".into(), serde_json::json!("tcp"));
        body.insert("service".into(), serde_json::json!("http"));
        body.insert("flag".into(), serde_json::json!("SF"));
        serde_json::Value::Object(body)
    }

    #[test]
    fn test_full_record_against_expanded_schema() {
        let schema = expanded_schema(&NSL_KDD_NUMERIC);
        let classifier = Arc::new(StubClassifier::fixed(0.92));
        let engine = InferenceEngine::new(classifier.clone(), schema);

        let result = engine.detect_json(full_record_body()).unwrap();

        assert_eq!(result.is_threat, 1);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert_eq!(classifier.calls(), 1);
    }

    #[test]
    fn test_full_record_ignores_columns_outside_schema() {
        let numeric: Vec<&str> = NSL_KDD_NUMERIC
            .iter()
            .copied()
            .filter(|name| *name != "num_outbound_cmds")
            .collect();
        let width = numeric.len();
        let schema = expanded_schema(&numeric);
        let classifier = Arc::new(StubClassifier::with(move |row| {
            // protocol_type_tcp follows the numeric block
            row.values()[width].as_numeric().unwrap_or_default() * 0.92
        }));
        let engine = InferenceEngine::new(classifier.clone(), schema);

        let result = engine.detect_json(full_record_body()).unwrap();

        assert_eq!(result.threat_probability, 0.92);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert_eq!(classifier.calls(), 1);
    }

    #[test]
    fn test_full_record_still_rejects_unknown_fields() {
        let engine = InferenceEngine::new(
            Arc::new(StubClassifier::fixed(0.5)),
            expanded_schema(&NSL_KDD_NUMERIC),
        );
        let mut body = full_record_body();
        body["payload_entropy"] = serde_json::json!(3.2);

        let err = engine.detect_json(body).unwrap_err();
        assert!(matches!(err, DetectionError::Schema(msg) if msg.contains("payload_entropy")));
    }

    #[test]
    fn test_bare_csv_file_name_is_accepted() {
        let engine = engine_with(src_bytes_classifier());
        let csv = format!("{HEADER}\ntcp,http,SF,0,200,300,0,0,0,0,1,1\n");

        let result = engine.detect_upload(".csv", csv.as_bytes()).unwrap();
        assert_eq!(result.total, 1);
        assert!(engine.detect_upload("traffic.csv.txt", csv.as_bytes()).is_err());
    }

    #[test]
    fn test_batch_classifier_failure_returns_no_rows() {
        let engine = engine_with(Arc::new(StubClassifier::failing("out of memory")));
        let csv = format!("{HEADER}\ntcp,http,SF,0,200,300,0,0,0,0,1,1\n");

        let err = engine.detect_upload("traffic.csv", csv.as_bytes()).unwrap_err();
        assert!(!err.is_validation());
    }
}
