//! Logistic regression inference.
//!
//! Multinomial exports carry one coefficient row per class and evaluate
//! `softmax(W*x + b)`.  Binary exports carry a single row scoring the second
//! class, so `p = [1 - sigmoid(z), sigmoid(z)]`.

use serde::Deserialize;

use super::{labels, sigmoid, softmax, ClassLabel, Classifier, FeatureRow, FEATURE_COUNT};
use crate::error::DeserializationError;

#[derive(Debug, Deserialize)]
struct LinearModelJson {
    classes: Vec<ClassLabel>,
    #[serde(alias = "weights")]
    coefficients: Vec<Vec<f64>>,
    #[serde(alias = "biases")]
    intercepts: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct LinearModel {
    weights: Vec<[f64; FEATURE_COUNT]>,
    biases: Vec<f64>,
    n_classes: usize,
}

impl LinearModel {
    pub(crate) fn from_value(
        value: serde_json::Value,
    ) -> Result<(Vec<String>, Self), DeserializationError> {
        let parsed: LinearModelJson = serde_json::from_value(value)?;
        let classes = labels(parsed.classes);
        let model = Self::new(parsed.coefficients, parsed.intercepts, classes.len())?;
        Ok((classes, model))
    }

    pub fn new(
        coefficients: Vec<Vec<f64>>,
        intercepts: Vec<f64>,
        n_classes: usize,
    ) -> Result<Self, DeserializationError> {
        let binary = n_classes == 2 && coefficients.len() == 1;
        if !binary && coefficients.len() != n_classes {
            return Err(DeserializationError::Inconsistent(format!(
                "{} coefficient rows for {} classes",
                coefficients.len(),
                n_classes
            )));
        }
        if intercepts.len() != coefficients.len() {
            return Err(DeserializationError::Inconsistent(format!(
                "{} intercepts for {} coefficient rows",
                intercepts.len(),
                coefficients.len()
            )));
        }

        let mut weights = Vec::with_capacity(coefficients.len());
        for (i, row) in coefficients.into_iter().enumerate() {
            let row: [f64; FEATURE_COUNT] = row.try_into().map_err(|row: Vec<f64>| {
                DeserializationError::Inconsistent(format!(
                    "coefficient row {} has {} weights, expected {}",
                    i,
                    row.len(),
                    FEATURE_COUNT
                ))
            })?;
            weights.push(row);
        }

        Ok(LinearModel {
            weights,
            biases: intercepts,
            n_classes,
        })
    }

    fn decision(&self, row: &FeatureRow) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.biases)
            .map(|(w, b)| w.iter().zip(row.as_slice()).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect()
    }
}

impl Classifier for LinearModel {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, row: &FeatureRow) -> Result<Vec<f64>, String> {
        let z = self.decision(row);
        if z.iter().any(|v| !v.is_finite()) {
            return Err("linear model produced a non-finite score".to_string());
        }
        if self.weights.len() == 1 {
            let p = sigmoid(z[0]);
            Ok(vec![1.0 - p, p])
        } else {
            Ok(softmax(&z))
        }
    }
}
