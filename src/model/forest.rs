//! Random forest inference over trees exported in scikit-learn's `tree_`
//! array layout:
//!
//! ```json
//! {
//!   "model_type": "random_forest",
//!   "classes": ["A", "D", "H"],
//!   "trees": [{
//!     "children_left":  [1, -1, -1],
//!     "children_right": [2, -1, -1],
//!     "feature":        [3, -2, -2],
//!     "threshold":      [2.0, -2.0, -2.0],
//!     "value":          [[10, 5, 5], [8, 1, 1], [2, 4, 4]]
//!   }]
//! }
//! ```
//!
//! A node is a leaf when `children_left[i] == -1`.  `value` holds per-class
//! sample counts (or weighted fractions); the tree's probability is the
//! normalised leaf row and the forest averages over trees.

use serde::Deserialize;

use super::{labels, ClassLabel, Classifier, FeatureRow, FEATURE_COUNT};
use crate::error::DeserializationError;

const LEAF: i64 = -1;

#[derive(Debug, Deserialize)]
struct TreeJson {
    children_left: Vec<i64>,
    children_right: Vec<i64>,
    feature: Vec<i64>,
    threshold: Vec<f64>,
    value: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct RandomForestJson {
    classes: Vec<ClassLabel>,
    trees: Vec<TreeJson>,
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf(Vec<f64>),
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn from_json(
        index: usize,
        raw: TreeJson,
        n_classes: usize,
    ) -> Result<Self, DeserializationError> {
        let n = raw.children_left.len();
        let inconsistent =
            |msg: String| DeserializationError::Inconsistent(format!("tree {index}: {msg}"));

        if n == 0 {
            return Err(inconsistent("no nodes".to_string()));
        }
        if raw.children_right.len() != n
            || raw.feature.len() != n
            || raw.threshold.len() != n
            || raw.value.len() != n
        {
            return Err(inconsistent("node arrays have different lengths".to_string()));
        }

        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let left = raw.children_left[i];
            let right = raw.children_right[i];

            if left == LEAF {
                let counts = &raw.value[i];
                if counts.len() != n_classes {
                    return Err(inconsistent(format!(
                        "leaf {i} has {} values for {n_classes} classes",
                        counts.len()
                    )));
                }
                let total: f64 = counts.iter().sum();
                if !total.is_finite() || total <= 0.0 || counts.iter().any(|c| *c < 0.0) {
                    return Err(inconsistent(format!("leaf {i} has no usable class weights")));
                }
                nodes.push(Node::Leaf(counts.iter().map(|c| c / total).collect()));
                continue;
            }

            // Children always come after their parent in pre-order, which also
            // rules out cycles.
            let in_range = |c: i64| c > i as i64 && (c as usize) < n;
            if !in_range(left) || !in_range(right) {
                return Err(inconsistent(format!("node {i} has invalid children")));
            }
            let feature = raw.feature[i];
            if feature < 0 || feature as usize >= FEATURE_COUNT {
                return Err(inconsistent(format!("node {i} splits on feature {feature}")));
            }
            nodes.push(Node::Split {
                feature: feature as usize,
                threshold: raw.threshold[i],
                left: left as usize,
                right: right as usize,
            });
        }

        Ok(Tree { nodes })
    }

    fn leaf(&self, row: &FeatureRow) -> &[f64] {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf(p) => return p,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    // Trees are fitted on float32 inputs.
                    let x = row.0[*feature] as f32 as f64;
                    i = if x <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<Tree>,
    n_classes: usize,
}

impl RandomForest {
    pub(crate) fn from_value(
        value: serde_json::Value,
    ) -> Result<(Vec<String>, Self), DeserializationError> {
        let parsed: RandomForestJson = serde_json::from_value(value)?;
        let classes = labels(parsed.classes);
        let n_classes = classes.len();
        if parsed.trees.is_empty() {
            return Err(DeserializationError::Inconsistent(
                "forest has no trees".to_string(),
            ));
        }
        let trees = parsed
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| Tree::from_json(i, t, n_classes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((classes, RandomForest { trees, n_classes }))
    }
}

impl Classifier for RandomForest {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, row: &FeatureRow) -> Result<Vec<f64>, String> {
        let mut acc = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (a, p) in acc.iter_mut().zip(tree.leaf(row)) {
                *a += p;
            }
        }
        let n = self.trees.len() as f64;
        Ok(acc.into_iter().map(|a| a / n).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn stump(threshold: f64, left: [f64; 3], right: [f64; 3]) -> serde_json::Value {
        json!({
            "children_left": [1, -1, -1],
            "children_right": [2, -1, -1],
            "feature": [3, -2, -2],
            "threshold": [threshold, -2.0, -2.0],
            "value": [[1.0, 1.0, 1.0], left, right]
        })
    }

    fn forest(trees: Vec<serde_json::Value>) -> RandomForest {
        let (_, f) = RandomForest::from_value(json!({
            "model_type": "random_forest",
            "classes": ["A", "D", "H"],
            "trees": trees
        }))
        .unwrap();
        f
    }

    #[test]
    fn single_tree_routes_on_threshold() {
        let f = forest(vec![stump(2.0, [0.0, 0.0, 4.0], [4.0, 0.0, 0.0])]);
        let favourite = f
            .predict_proba(&FeatureRow::new((0, 0, 0), 1.5, 3.4, 5.0))
            .unwrap();
        assert_eq!(favourite, vec![0.0, 0.0, 1.0]);
        let outsider = f
            .predict_proba(&FeatureRow::new((0, 0, 0), 4.0, 3.4, 1.8))
            .unwrap();
        assert_eq!(outsider, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn threshold_equality_goes_left() {
        let f = forest(vec![stump(2.0, [0.0, 0.0, 1.0], [1.0, 0.0, 0.0])]);
        let p = f
            .predict_proba(&FeatureRow::new((0, 0, 0), 2.0, 3.0, 3.0))
            .unwrap();
        assert_eq!(p, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn forest_averages_normalised_leaves() {
        let f = forest(vec![
            stump(2.0, [1.0, 1.0, 2.0], [1.0, 0.0, 0.0]),
            stump(3.0, [0.0, 3.0, 1.0], [0.0, 0.0, 1.0]),
        ]);
        let p = f
            .predict_proba(&FeatureRow::new((0, 0, 0), 1.9, 3.2, 4.0))
            .unwrap();
        assert_relative_eq!(p[0], 0.125, epsilon = 1e-12);
        assert_relative_eq!(p[1], 0.5, epsilon = 1e-12);
        assert_relative_eq!(p[2], 0.375, epsilon = 1e-12);
    }

    #[test]
    fn backward_child_reference_is_rejected() {
        let tree = json!({
            "children_left": [0, -1],
            "children_right": [1, -1],
            "feature": [0, -2],
            "threshold": [0.5, -2.0],
            "value": [[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]]
        });
        let err = RandomForest::from_value(json!({"classes": ["A", "D", "H"], "trees": [tree]}))
            .unwrap_err();
        assert!(matches!(err, DeserializationError::Inconsistent(_)));
    }

    #[test]
    fn out_of_range_feature_is_rejected() {
        let mut tree = stump(2.0, [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]);
        tree["feature"] = json!([6, -2, -2]);
        let err = RandomForest::from_value(json!({"classes": ["A", "D", "H"], "trees": [tree]}))
            .unwrap_err();
        assert!(matches!(err, DeserializationError::Inconsistent(_)));
    }

    #[test]
    fn empty_leaf_is_rejected() {
        let tree = stump(2.0, [0.0, 0.0, 0.0], [0.0, 0.0, 1.0]);
        let err = RandomForest::from_value(json!({"classes": ["A", "D", "H"], "trees": [tree]}))
            .unwrap_err();
        assert!(matches!(err, DeserializationError::Inconsistent(_)));
    }

    #[test]
    fn empty_forest_is_rejected() {
        let err = RandomForest::from_value(json!({"classes": ["A", "D", "H"], "trees": []}))
            .unwrap_err();
        assert!(matches!(err, DeserializationError::Inconsistent(_)));
    }
}
