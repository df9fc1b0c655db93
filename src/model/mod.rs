//! Deserialised classifier and the feature row it consumes.
//!
//! Artifacts are JSON exports tagged by `model_type`:
//! - `linear_model` — multinomial / binary logistic regression
//! - `random_forest` — tree ensemble in scikit-learn `tree_` array layout
//! - `onnx` — base64 ONNX graph, evaluated only with the `onnx` feature

pub mod forest;
pub mod linear;
#[cfg(feature = "onnx")]
pub mod onnx;

use serde::Deserialize;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::error::{DeserializationError, PredictError};

pub use forest::RandomForest;
pub use linear::LinearModel;

/// Number of columns in a feature row.
pub const FEATURE_COUNT: usize = 6;

/// Tolerance on the probability vector summing to one.
const SUM_TOLERANCE: f64 = 1e-6;

/// `[league_id, team1_id, team2_id, odd1, oddx, odd2]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRow(pub [f64; FEATURE_COUNT]);

impl FeatureRow {
    pub fn new(ids: (u32, u32, u32), odd1: f64, oddx: f64, odd2: f64) -> Self {
        let (league, team1, team2) = ids;
        FeatureRow([
            league as f64,
            team1 as f64,
            team2 as f64,
            odd1,
            oddx,
            odd2,
        ])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// A probabilistic classifier over [`FeatureRow`]s.
///
/// Implementations must be pure: `predict_proba` never mutates and returns
/// one value per class, in class order.
pub trait Classifier: Send + Sync {
    fn n_classes(&self) -> usize;

    fn predict_proba(&self, row: &FeatureRow) -> Result<Vec<f64>, String>;
}

/// A loaded model: class labels plus the classifier producing probabilities
/// aligned with them.
pub struct ModelHandle {
    classes: Vec<String>,
    classifier: Box<dyn Classifier>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("classes", &self.classes)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    model_type: String,
}

/// Class labels may be exported as strings ("H", "D", "A") or numbers (1, 0, 2).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ClassLabel {
    Text(String),
    Int(i64),
    Float(f64),
}

impl ClassLabel {
    fn into_label(self) -> String {
        match self {
            ClassLabel::Text(s) => s,
            ClassLabel::Int(i) => i.to_string(),
            ClassLabel::Float(f) => f.to_string(),
        }
    }
}

pub(crate) fn labels(raw: Vec<ClassLabel>) -> Vec<String> {
    raw.into_iter().map(ClassLabel::into_label).collect()
}

impl ModelHandle {
    /// Wrap an already-built classifier.
    pub fn new(
        classes: Vec<String>,
        classifier: Box<dyn Classifier>,
    ) -> Result<Self, DeserializationError> {
        if classes.len() < 2 {
            return Err(DeserializationError::Inconsistent(format!(
                "expected at least 2 classes, got {}",
                classes.len()
            )));
        }
        let unique: HashSet<&String> = classes.iter().collect();
        if unique.len() != classes.len() {
            return Err(DeserializationError::Inconsistent(
                "duplicate class labels".to_string(),
            ));
        }
        if classifier.n_classes() != classes.len() {
            return Err(DeserializationError::Inconsistent(format!(
                "classifier produces {} outputs for {} classes",
                classifier.n_classes(),
                classes.len()
            )));
        }
        Ok(ModelHandle {
            classes,
            classifier,
        })
    }

    /// Deserialise a model artifact from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DeserializationError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        debug!("Deserialising model artifact {} ({} bytes)", path.display(), bytes.len());
        Self::from_slice(&bytes)
    }

    /// Deserialise a model artifact from its raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DeserializationError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let envelope: Envelope = serde_json::from_value(value.clone())?;

        match envelope.model_type.as_str() {
            "linear_model" => {
                let (classes, model) = LinearModel::from_value(value)?;
                Self::new(classes, Box::new(model))
            }
            "random_forest" => {
                let (classes, model) = RandomForest::from_value(value)?;
                Self::new(classes, Box::new(model))
            }
            "onnx" => load_onnx(value),
            other => Err(DeserializationError::UnsupportedModelType(other.to_string())),
        }
    }

    /// Class labels in output order.
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Class probabilities for one row, aligned with [`Self::classes`].
    pub fn predict_proba(&self, row: &FeatureRow) -> Result<Vec<f64>, PredictError> {
        let probs = self
            .classifier
            .predict_proba(row)
            .map_err(PredictError::Inference)?;
        check_distribution(&probs, self.classes.len())?;
        Ok(probs)
    }

    /// Labels paired positionally with their probabilities.
    pub fn predict(&self, row: &FeatureRow) -> Result<(Vec<String>, Vec<f64>), PredictError> {
        let probs = self.predict_proba(row)?;
        Ok((self.classes.clone(), probs))
    }
}

/// Best label plus the full label → probability map, in class order.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub best: String,
    pub probabilities: IndexMap<String, f64>,
}

impl PredictionResult {
    /// Pair labels with probabilities and pick the argmax.  On a tie the label
    /// that comes first in class order wins.
    pub fn from_output(labels: Vec<String>, probs: Vec<f64>) -> Result<Self, PredictError> {
        if labels.is_empty() || labels.len() != probs.len() {
            return Err(PredictError::Inference(format!(
                "{} labels for {} probabilities",
                labels.len(),
                probs.len()
            )));
        }

        let mut best = 0;
        for (i, p) in probs.iter().enumerate().skip(1) {
            if *p > probs[best] {
                best = i;
            }
        }
        let best = labels[best].clone();
        let probabilities = labels.into_iter().zip(probs).collect();
        Ok(PredictionResult {
            best,
            probabilities,
        })
    }
}

fn check_distribution(probs: &[f64], n_classes: usize) -> Result<(), PredictError> {
    if probs.len() != n_classes {
        return Err(PredictError::Inference(format!(
            "model returned {} probabilities for {} classes",
            probs.len(),
            n_classes
        )));
    }
    if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(PredictError::Inference(
            "model returned a non-finite or negative probability".to_string(),
        ));
    }
    let sum: f64 = probs.iter().sum();
    if (sum - 1.0).abs() > SUM_TOLERANCE {
        return Err(PredictError::Inference(format!(
            "model probabilities sum to {sum}, expected 1"
        )));
    }
    Ok(())
}

#[cfg(feature = "onnx")]
fn load_onnx(value: serde_json::Value) -> Result<ModelHandle, DeserializationError> {
    let (classes, model) = onnx::OnnxClassifier::from_value(value)?;
    ModelHandle::new(classes, Box::new(model))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(_value: serde_json::Value) -> Result<ModelHandle, DeserializationError> {
    Err(DeserializationError::MissingDependency {
        dependency: "tract-onnx",
        remedy: "cargo build --release --features onnx",
    })
}

/// Numerically stable softmax.
pub(crate) fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::{Arc, Mutex};

    /// Classifier returning fixed probabilities and recording every row it sees.
    pub(crate) struct RecordingClassifier {
        pub probs: Vec<f64>,
        pub rows: Arc<Mutex<Vec<FeatureRow>>>,
    }

    impl Classifier for RecordingClassifier {
        fn n_classes(&self) -> usize {
            self.probs.len()
        }

        fn predict_proba(&self, row: &FeatureRow) -> Result<Vec<f64>, String> {
            self.rows.lock().unwrap().push(*row);
            Ok(self.probs.clone())
        }
    }

    pub(crate) const LINEAR_ARTIFACT: &str = r#"{
        "model_type": "linear_model",
        "classes": ["A", "D", "H"],
        "coefficients": [
            [0.01, -0.02, 0.03, 0.40, -0.10, -0.35],
            [0.00, 0.01, -0.01, -0.05, 0.20, -0.05],
            [-0.01, 0.01, -0.02, -0.35, -0.10, 0.40]
        ],
        "intercepts": [0.1, -0.2, 0.1]
    }"#;

    #[test]
    fn feature_row_order() {
        let row = FeatureRow::new((0, 3, 7), 2.1, 3.4, 3.0);
        assert_eq!(row.as_slice(), &[0.0, 3.0, 7.0, 2.1, 3.4, 3.0]);
    }

    #[test]
    fn loads_linear_artifact() {
        let model = ModelHandle::from_slice(LINEAR_ARTIFACT.as_bytes()).unwrap();
        assert_eq!(model.classes(), &["A", "D", "H"]);
        let probs = model
            .predict_proba(&FeatureRow::new((0, 3, 7), 2.1, 3.4, 3.0))
            .unwrap();
        assert_eq!(probs.len(), 3);
        assert_relative_eq!(probs.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn onnx_without_feature_reports_missing_dependency() {
        if cfg!(feature = "onnx") {
            return;
        }
        let json = r#"{"model_type": "onnx", "classes": ["A", "D", "H"], "graph": ""}"#;
        let err = ModelHandle::from_slice(json.as_bytes()).unwrap_err();
        match err {
            DeserializationError::MissingDependency { dependency, remedy } => {
                assert_eq!(dependency, "tract-onnx");
                assert!(remedy.contains("--features onnx"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_model_type_is_unsupported() {
        let json = r#"{"model_type": "svm_rbf"}"#;
        assert!(matches!(
            ModelHandle::from_slice(json.as_bytes()),
            Err(DeserializationError::UnsupportedModelType(t)) if t == "svm_rbf"
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = ModelHandle::from_slice(b"\x80\x04\x95pickle").unwrap_err();
        assert!(matches!(err, DeserializationError::Malformed(_)));
    }

    #[test]
    fn duplicate_labels_are_inconsistent() {
        let clf = RecordingClassifier {
            probs: vec![0.5, 0.5],
            rows: Arc::default(),
        };
        let err = ModelHandle::new(vec!["H".into(), "H".into()], Box::new(clf)).unwrap_err();
        assert!(matches!(err, DeserializationError::Inconsistent(_)));
    }

    #[test]
    fn non_normalised_output_is_an_inference_error() {
        let clf = RecordingClassifier {
            probs: vec![0.7, 0.7],
            rows: Arc::default(),
        };
        let model = ModelHandle::new(vec!["H".into(), "A".into()], Box::new(clf)).unwrap();
        let err = model
            .predict_proba(&FeatureRow::new((0, 0, 0), 1.0, 1.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, PredictError::Inference(_)));
    }

    #[test]
    fn argmax_picks_highest_probability() {
        let r = PredictionResult::from_output(
            vec!["A".into(), "D".into(), "H".into()],
            vec![0.2, 0.3, 0.5],
        )
        .unwrap();
        assert_eq!(r.best, "H");
        assert_eq!(r.probabilities.len(), 3);
        assert_relative_eq!(r.probabilities["D"], 0.3);
    }

    #[test]
    fn probabilities_keep_class_order() {
        let r = PredictionResult::from_output(
            vec!["H".into(), "D".into(), "A".into()],
            vec![0.5, 0.3, 0.2],
        )
        .unwrap();
        let keys: Vec<&str> = r.probabilities.keys().map(String::as_str).collect();
        assert_eq!(keys, ["H", "D", "A"]);
    }

    #[test]
    fn argmax_tie_goes_to_first_label_in_class_order() {
        let r = PredictionResult::from_output(
            vec!["H".into(), "A".into(), "D".into()],
            vec![0.4, 0.4, 0.2],
        )
        .unwrap();
        assert_eq!(r.best, "H");
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let p = softmax(&[1000.0, 1000.0]);
        assert_relative_eq!(p[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(p[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelHandle::load(dir.path().join("model.json")).unwrap_err();
        assert!(matches!(err, DeserializationError::Io(_)));
    }
}
