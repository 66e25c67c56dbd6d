//! Connection record data structures

use crate::error::DetectionError;
use crate::models::schema::SchemaVariant;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Columns that hold categorical (string) values in every schema variant
pub const CATEGORICAL_COLUMNS: [&str; 3] = ["protocol_type", "service", "flag"];

/// Whether a raw column name is one of the categorical inputs
pub fn is_categorical_column(name: &str) -> bool {
    CATEGORICAL_COLUMNS.contains(&name)
}

/// A single cell value after type resolution
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Categorical(String),
    Numeric(f64),
}

impl FeatureValue {
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            FeatureValue::Numeric(value) => Some(*value),
            FeatureValue::Categorical(_) => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            FeatureValue::Categorical(value) => Some(value),
            FeatureValue::Numeric(_) => None,
        }
    }
}

/// Caller-supplied feature values keyed by field name, prior to alignment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord(BTreeMap<String, FeatureValue>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FeatureValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Keep only the fields `keep` accepts
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|name, _| keep(name));
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build a record from a JSON object: strings become categorical values,
    /// numbers become numeric values, anything else is rejected.
    pub fn from_json_object(
        object: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, DetectionError> {
        let mut record = Self::new();
        for (name, value) in object {
            let value = match value {
                serde_json::Value::String(s) => FeatureValue::Categorical(s.clone()),
                serde_json::Value::Number(n) => n
                    .as_f64()
                    .map(FeatureValue::Numeric)
                    .ok_or_else(|| DetectionError::Schema(format!("field '{name}' is not a finite number")))?,
                other => {
                    return Err(DetectionError::Schema(format!(
                        "field '{name}' has unsupported value {other}"
                    )))
                }
            };
            record.insert(name.clone(), value);
        }
        Ok(record)
    }
}

impl FromIterator<(String, FeatureValue)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (String, FeatureValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Feature values in exact schema order
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRecord {
    values: Vec<FeatureValue>,
}

impl AlignedRecord {
    pub fn new(values: Vec<FeatureValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[FeatureValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Re-key the values by schema field name
    pub fn to_raw(&self, fields: &[String]) -> RawRecord {
        fields
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

/// Connection features accepted by the `simple` schema variant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConnectionRecord {
    /// Transport protocol (tcp, udp, icmp)
    pub protocol_type: String,
    /// Destination network service (http, ftp_data, private, ...)
    pub service: String,
    /// Connection status flag (SF, S0, REJ, ...)
    pub flag: String,
    /// Connection length in seconds
    pub duration: f64,
    /// Bytes from source to destination
    pub src_bytes: f64,
    /// Bytes from destination to source
    pub dst_bytes: f64,
    pub wrong_fragment: i64,
    pub urgent: i64,
    pub hot: i64,
    pub num_failed_logins: i64,
    /// Connections to the same host in the past two seconds
    pub count: i64,
    /// 1 if successfully logged in
    pub logged_in: i64,
}

/// Full NSL-KDD connection features accepted by the `one_hot` schema variant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FullConnectionRecord {
    pub duration: f64,
    pub protocol_type: String,
    pub service: String,
    pub flag: String,
    pub src_bytes: f64,
    pub dst_bytes: f64,
    pub land: f64,
    pub wrong_fragment: f64,
    pub urgent: f64,
    pub hot: f64,
    pub num_failed_logins: f64,
    pub logged_in: f64,
    pub num_compromised: f64,
    pub root_shell: f64,
    pub su_attempted: f64,
    pub num_root: f64,
    pub num_file_creations: f64,
    pub num_shells: f64,
    pub num_access_files: f64,
    pub num_outbound_cmds: f64,
    pub is_host_login: f64,
    pub is_guest_login: f64,
    pub count: f64,
    pub srv_count: f64,
    pub serror_rate: f64,
    pub srv_serror_rate: f64,
    pub rerror_rate: f64,
    pub srv_rerror_rate: f64,
    pub same_srv_rate: f64,
    pub diff_srv_rate: f64,
    pub srv_diff_host_rate: f64,
    pub dst_host_count: f64,
    pub dst_host_srv_count: f64,
    pub dst_host_same_srv_rate: f64,
    pub dst_host_diff_srv_rate: f64,
    pub dst_host_same_src_port_rate: f64,
    pub dst_host_srv_diff_host_rate: f64,
    pub dst_host_serror_rate: f64,
    pub dst_host_srv_serror_rate: f64,
    pub dst_host_rerror_rate: f64,
    pub dst_host_srv_rerror_rate: f64,
}

/// A single-record request body, typed by the active schema variant
#[derive(Debug, Clone, PartialEq)]
pub enum RecordInput {
    Simple(ConnectionRecord),
    Full(Box<FullConnectionRecord>),
}

impl RecordInput {
    /// Validate an untyped request body against the record type of `variant`.
    ///
    /// Missing, unknown, or mistyped fields are rejected here.
    pub fn parse(variant: SchemaVariant, body: serde_json::Value) -> Result<Self, DetectionError> {
        let invalid = |e: serde_json::Error| DetectionError::Schema(e.to_string());
        match variant {
            SchemaVariant::Simple => serde_json::from_value(body).map(Self::Simple).map_err(invalid),
            SchemaVariant::OneHot => serde_json::from_value(body)
                .map(|record| Self::Full(Box::new(record)))
                .map_err(invalid),
        }
    }

    /// Convert to a name-keyed record for alignment
    pub fn to_raw(&self) -> Result<RawRecord, DetectionError> {
        let value = match self {
            RecordInput::Simple(record) => serde_json::to_value(record),
            RecordInput::Full(record) => serde_json::to_value(record),
        }
        .map_err(|e| DetectionError::Schema(e.to_string()))?;

        match value {
            serde_json::Value::Object(object) => RawRecord::from_json_object(&object),
            _ => Err(DetectionError::Schema("record did not serialize to an object".into())),
        }
    }
}

impl ConnectionRecord {
    /// The reference web connection used across tests and docs
    pub fn sample() -> Self {
        Self {
            protocol_type: "tcp".to_string(),
            service: "http".to_string(),
            flag: "SF".to_string(),
            duration: 0.0,
            src_bytes: 200.0,
            dst_bytes: 300.0,
            wrong_fragment: 0,
            urgent: 0,
            hot: 0,
            num_failed_logins: 0,
            count: 1,
            logged_in: 1,
        }
    }
}
