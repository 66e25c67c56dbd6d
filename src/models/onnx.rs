//! ONNX Runtime backed classifier

use crate::models::classifier::{Classifier, Prediction};
use crate::models::encoder::FeatureEncoder;
use crate::types::record::AlignedRecord;
use anyhow::{Context, Result};
use ort::memory::Allocator;
use ort::session::Session;
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use std::sync::Mutex;
use tracing::debug;

/// Classifier exported from the training pipeline as an ONNX graph.
///
/// Sessions need exclusive access while running, so concurrent requests
/// serialize on the internal lock.
pub struct OnnxClassifier {
    name: String,
    session: Mutex<Session>,
    input_name: String,
    label_output: Option<String>,
    probability_output: String,
    encoder: FeatureEncoder,
}

impl OnnxClassifier {
    /// Wrap a loaded session, resolving input and output names
    pub fn new(name: &str, session: Session, encoder: FeatureEncoder) -> Self {
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let label_output = session
            .outputs
            .iter()
            .find(|o| o.name.contains("label"))
            .map(|o| o.name.clone());

        let probability_output = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.iter().rfind(|o| !o.name.contains("label")))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "probabilities".to_string());

        Self {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            label_output,
            probability_output,
            encoder,
        }
    }

    pub fn input_width(&self) -> usize {
        self.encoder.width()
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn probability_output(&self) -> &str {
        &self.probability_output
    }

    /// Attack probabilities from either a `[batch, classes]` tensor or the
    /// `seq(map(int64, float))` layout some exporters emit
    fn extract_probabilities(
        &self,
        outputs: &ort::session::SessionOutputs,
        batch: usize,
    ) -> Result<Vec<f64>> {
        let output = outputs
            .get(self.probability_output.as_str())
            .with_context(|| format!("Model produced no '{}' output", self.probability_output))?;

        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            return probabilities_from_tensor(&dims, data, batch);
        }

        let dtype = output.dtype();
        if DynSequenceValueType::can_downcast(&dtype) {
            return self.extract_from_sequence_map(output, batch);
        }

        anyhow::bail!(
            "Unsupported probability output type for '{}'",
            self.probability_output
        )
    }

    fn extract_from_sequence_map(&self, output: &DynValue, batch: usize) -> Result<Vec<f64>> {
        let allocator = Allocator::default();

        let sequence = output
            .downcast_ref::<DynSequenceValueType>()
            .map_err(|e| anyhow::anyhow!("Failed to downcast to sequence: {}", e))?;

        let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;
        if maps.len() != batch {
            anyhow::bail!("Model returned {} probability maps for {} rows", maps.len(), batch);
        }

        let mut probabilities = Vec::with_capacity(batch);
        for map_value in &maps {
            let kv_pairs = map_value.try_extract_key_values::<i64, f32>()?;
            let attack = kv_pairs
                .iter()
                .find(|(class_id, _)| *class_id == 1)
                .map(|(_, prob)| *prob as f64)
                .or_else(|| {
                    kv_pairs
                        .iter()
                        .find(|(class_id, _)| *class_id == 0)
                        .map(|(_, prob)| 1.0 - *prob as f64)
                })
                .context("No class probability found in map")?;
            probabilities.push(attack);
        }

        Ok(probabilities)
    }

    fn extract_labels(
        &self,
        outputs: &ort::session::SessionOutputs,
        probabilities: &[f64],
    ) -> Result<Vec<u8>> {
        match self
            .label_output
            .as_deref()
            .and_then(|name| outputs.get(name).map(|output| (name, output)))
        {
            Some((name, output)) => labels_from_output(name, output, probabilities.len()),
            // Graphs without a label output fall back to the argmax rule
            None => Ok(probabilities.iter().map(|&p| u8::from(p >= 0.5)).collect()),
        }
    }
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, rows: &[AlignedRecord]) -> Result<Vec<Prediction>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let batch = rows.len();
        let data = self.encoder.encode(rows)?;
        let shape = vec![batch as i64, self.encoder.width() as i64];
        let input_tensor =
            Tensor::from_array((shape, data)).context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let outputs = session.run(ort::inputs![self.input_name.as_str() => input_tensor])?;

        let probabilities = self.extract_probabilities(&outputs, batch)?;
        let labels = self.extract_labels(&outputs, &probabilities)?;

        debug!(model = %self.name, rows = batch, "ONNX batch scored");

        Ok(labels
            .into_iter()
            .zip(probabilities)
            .map(|(label, probability)| Prediction { label, probability })
            .collect())
    }
}

/// Read the attack-class column from a probability tensor
fn probabilities_from_tensor(dims: &[i64], data: &[f32], batch: usize) -> Result<Vec<f64>> {
    let classes = match dims {
        [rows, classes] if *rows as usize == batch => *classes as usize,
        [len] if *len as usize == batch => 1,
        _ => anyhow::bail!("Unexpected probability tensor shape {:?} for {} rows", dims, batch),
    };

    if classes == 0 || data.len() != batch * classes {
        anyhow::bail!("Probability tensor holds {} values, expected {}", data.len(), batch * classes);
    }

    let column = if classes >= 2 { 1 } else { 0 };
    Ok((0..batch)
        .map(|row| data[row * classes + column] as f64)
        .collect())
}

/// Read a named int64 label output; any other layout is an error
fn labels_from_output(name: &str, output: &DynValue, batch: usize) -> Result<Vec<u8>> {
    let (_, data) = output
        .try_extract_tensor::<i64>()
        .with_context(|| format!("Label output '{}' is not an int64 tensor", name))?;

    if data.len() != batch {
        anyhow::bail!("Model returned {} labels for {} rows", data.len(), batch);
    }
    Ok(data.iter().map(|&label| u8::from(label == 1)).collect())
}
