use crate::error::AppError;
use crate::types::{FEATURE_COUNT, FEATURE_NAMES};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// One tree in node-array form, the layout the forest was persisted in.
/// `children_left[i] < 0` marks node `i` as a leaf; otherwise samples with
/// `x[feature[i]] <= threshold[i]` descend left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub feature: Vec<i32>,
    pub threshold: Vec<f64>,
    pub children_left: Vec<i32>,
    pub children_right: Vec<i32>,
    /// Per-node class counts, one row per node.
    pub value: Vec<Vec<f64>>,
}

impl DecisionTree {
    fn node_count(&self) -> usize {
        self.feature.len()
    }

    /// Walk to the leaf for `x` and return its class-count row.
    fn leaf_value(&self, x: &[f64; FEATURE_COUNT]) -> &[f64] {
        let mut node = 0usize;
        // Validated at load: child indices in range, so this terminates
        // within node_count steps.
        for _ in 0..self.node_count() {
            if self.children_left[node] < 0 {
                break;
            }
            node = if x[self.feature[node] as usize] <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        &self.value[node]
    }

    fn validate(&self, index: usize, n_classes: usize) -> Result<(), AppError> {
        let n = self.node_count();
        let malformed = |msg: String| AppError::ModelLoad(format!("tree {}: {}", index, msg));

        if n == 0 {
            return Err(malformed("empty node arrays".to_string()));
        }
        if self.threshold.len() != n
            || self.children_left.len() != n
            || self.children_right.len() != n
            || self.value.len() != n
        {
            return Err(malformed(format!(
                "inconsistent node arrays (feature={}, threshold={}, left={}, right={}, value={})",
                n,
                self.threshold.len(),
                self.children_left.len(),
                self.children_right.len(),
                self.value.len()
            )));
        }

        for node in 0..n {
            let left = self.children_left[node];
            let right = self.children_right[node];
            if (left < 0) != (right < 0) {
                return Err(malformed(format!("node {} has a single child", node)));
            }
            if left >= 0 {
                let feature = self.feature[node];
                if feature < 0 || feature as usize >= FEATURE_COUNT {
                    return Err(malformed(format!(
                        "node {} splits on out-of-range feature {}",
                        node, feature
                    )));
                }
                // Children must point strictly forward; rules out cycles.
                if (left as usize) <= node
                    || (left as usize) >= n
                    || (right as usize) <= node
                    || (right as usize) >= n
                {
                    return Err(malformed(format!("node {} has out-of-range children", node)));
                }
            }
            if self.value[node].len() != n_classes {
                return Err(malformed(format!(
                    "node {} has {} class counts, expected {}",
                    node,
                    self.value[node].len(),
                    n_classes
                )));
            }
        }

        Ok(())
    }
}

/// The pre-trained classifier. Loaded once at startup, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub version: String,
    pub feature_names: Vec<String>,
    pub classes: Vec<i64>,
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn load(path: &str) -> Result<Self, AppError> {
        if !Path::new(path).exists() {
            return Err(AppError::ModelLoad(format!("model artifact not found: {}", path)));
        }
        let content = std::fs::read_to_string(path)?;
        let forest: RandomForest = serde_json::from_str(&content)?;
        forest.validate()?;
        info!(
            "Loaded forest artifact from {}: version {}, {} trees, {} classes",
            path,
            forest.version,
            forest.trees.len(),
            forest.classes.len()
        );
        Ok(forest)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.feature_names != FEATURE_NAMES {
            return Err(AppError::ModelLoad(format!(
                "artifact feature order {:?} does not match expected {:?}",
                self.feature_names, FEATURE_NAMES
            )));
        }
        if self.classes.is_empty() {
            return Err(AppError::ModelLoad("artifact declares no classes".to_string()));
        }
        if self.trees.is_empty() {
            return Err(AppError::ModelLoad("artifact contains no trees".to_string()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(i, self.classes.len())?;
        }
        Ok(())
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Probability distribution over classes: the mean of each tree's
    /// normalized leaf class counts.
    pub fn predict_proba(&self, x: &[f64; FEATURE_COUNT]) -> Vec<f64> {
        let mut proba = vec![0.0; self.n_classes()];
        for tree in &self.trees {
            let counts = tree.leaf_value(x);
            let total: f64 = counts.iter().sum();
            if total > 0.0 {
                for (p, c) in proba.iter_mut().zip(counts) {
                    *p += c / total;
                }
            }
        }
        let n_trees = self.trees.len() as f64;
        for p in &mut proba {
            *p /= n_trees;
        }
        proba
    }

    /// Index of the most probable class. Ties resolve to the lower index,
    /// matching the argmax of the original model object.
    pub fn predict(&self, x: &[f64; FEATURE_COUNT]) -> usize {
        let proba = self.predict_proba(x);
        let mut best = 0usize;
        for (i, p) in proba.iter().enumerate() {
            if *p > proba[best] {
                best = i;
            }
        }
        best
    }
}
