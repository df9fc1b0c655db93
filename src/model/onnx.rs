//! ONNX classifier inference (pure Rust via `tract-onnx`).
//!
//! The artifact wraps a scikit-learn → ONNX export converted with
//! `zipmap=False`, so one output is a `[1, n_classes]` f32 probability tensor:
//!
//! ```json
//! { "model_type": "onnx", "classes": ["A", "D", "H"], "graph": "<base64>" }
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use tract_onnx::prelude::*;

use super::{labels, ClassLabel, Classifier, FeatureRow, FEATURE_COUNT};
use crate::error::DeserializationError;

#[derive(Debug, Deserialize)]
struct OnnxJson {
    classes: Vec<ClassLabel>,
    graph: String,
}

pub struct OnnxClassifier {
    plan: TypedRunnableModel<TypedModel>,
    n_classes: usize,
}

impl std::fmt::Debug for OnnxClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxClassifier")
            .field("n_classes", &self.n_classes)
            .finish()
    }
}

impl OnnxClassifier {
    pub(crate) fn from_value(
        value: serde_json::Value,
    ) -> Result<(Vec<String>, Self), DeserializationError> {
        let parsed: OnnxJson = serde_json::from_value(value)?;
        let classes = labels(parsed.classes);
        let bytes = BASE64
            .decode(parsed.graph.as_bytes())
            .map_err(|e| DeserializationError::Malformed(format!("onnx graph base64: {e}")))?;

        let malformed = |stage: &str, e: TractError| {
            DeserializationError::Malformed(format!("onnx {stage} failed: {e}"))
        };
        let plan = tract_onnx::onnx()
            .model_for_read(&mut bytes.as_slice())
            .map_err(|e| malformed("load", e))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, FEATURE_COUNT)),
            )
            .map_err(|e| malformed("input fact", e))?
            .into_optimized()
            .map_err(|e| malformed("optimize", e))?
            .into_runnable()
            .map_err(|e| malformed("runnable", e))?;

        let model = OnnxClassifier {
            plan,
            n_classes: classes.len(),
        };
        Ok((classes, model))
    }
}

impl Classifier for OnnxClassifier {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, row: &FeatureRow) -> Result<Vec<f64>, String> {
        let input: Vec<f32> = row.as_slice().iter().map(|v| *v as f32).collect();
        let tensor = tract_ndarray::Array2::<f32>::from_shape_vec((1, FEATURE_COUNT), input)
            .map_err(|e| format!("onnx input reshape failed: {e}"))?
            .into_tvalue();

        let outputs = self
            .plan
            .run(tvec!(tensor))
            .map_err(|e| format!("onnx run failed: {e}"))?;

        // Output 0 is usually the predicted label; take the first f32 tensor
        // shaped like a probability row.
        for out in outputs.iter() {
            if let Ok(view) = out.to_array_view::<f32>() {
                if view.len() == self.n_classes {
                    let probs: Vec<f64> = view.iter().map(|p| *p as f64).collect();
                    // f32 rounding can drift the sum past the 1e-6 tolerance.
                    let total: f64 = probs.iter().sum();
                    if total <= 0.0 {
                        return Err("onnx probabilities sum to zero".to_string());
                    }
                    return Ok(probs.into_iter().map(|p| p / total).collect());
                }
            }
        }
        Err(format!(
            "onnx graph has no {}-wide probability output",
            self.n_classes
        ))
    }
}
