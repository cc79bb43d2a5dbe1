use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::tree::DecisionTree;
use super::{ForestError, ForestParams};
use crate::ml::workers::map_indexed;

/// Fitted random forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub(super) params: ForestParams,
    /// Sorted class labels; probability column `j` belongs to `classes[j]`.
    pub(super) classes: Vec<i64>,
    pub(super) n_features: usize,
    pub(super) trees: Vec<DecisionTree>,
}

/// Mean impurity-based importance per feature and its spread across trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportances {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl RandomForest {
    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Validate structural invariants, e.g. after deserializing.
    pub fn validate(&self) -> Result<(), ForestError> {
        if self.classes.len() < 2 {
            return Err(ForestError::InvalidModel(
                "Model must contain at least 2 classes".to_string(),
            ));
        }
        if self.classes.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ForestError::InvalidModel(
                "Class labels must be sorted and unique".to_string(),
            ));
        }
        if self.trees.is_empty() {
            return Err(ForestError::InvalidModel("Model has no trees".to_string()));
        }
        for (idx, tree) in self.trees.iter().enumerate() {
            tree.validate(self.classes.len())
                .map_err(|err| ForestError::InvalidModel(format!("tree {idx}: {err}")))?;
            if tree.feature_importances().len() != self.n_features {
                return Err(ForestError::InvalidModel(format!(
                    "tree {idx} has importances for {} features, expected {}",
                    tree.feature_importances().len(),
                    self.n_features
                )));
            }
        }
        Ok(())
    }

    /// Class probabilities, one row per sample and one column per class.
    pub fn predict_proba(
        &self,
        features: ArrayView2<'_, f64>,
        workers: usize,
    ) -> Result<Array2<f64>, ForestError> {
        self.check_width(features)?;
        let n_classes = self.classes.len();
        let n_trees = self.trees.len().max(1) as f64;
        let rows = map_indexed(features.nrows(), workers, |i| {
            let row = features.row(i).to_vec();
            let mut sum = vec![0.0; n_classes];
            for tree in &self.trees {
                for (acc, p) in sum.iter_mut().zip(tree.predict_distribution(&row)) {
                    *acc += p;
                }
            }
            for value in &mut sum {
                *value /= n_trees;
            }
            sum
        });
        let mut out = Array2::zeros((features.nrows(), n_classes));
        for (i, probs) in rows.into_iter().enumerate() {
            for (j, p) in probs.into_iter().enumerate() {
                out[(i, j)] = p;
            }
        }
        Ok(out)
    }

    /// Most probable class label per sample; ties go to the smaller label.
    pub fn predict(
        &self,
        features: ArrayView2<'_, f64>,
        workers: usize,
    ) -> Result<Vec<i64>, ForestError> {
        let proba = self.predict_proba(features, workers)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| {
                let mut best = 0usize;
                for (j, &p) in row.iter().enumerate() {
                    if p > row[best] {
                        best = j;
                    }
                }
                self.classes[best]
            })
            .collect())
    }

    /// Impurity-based importances averaged over the trees.
    ///
    /// Trees that never split contribute nothing to the mean; the mean is
    /// renormalized to sum to one when any tree split at all. The spread is the
    /// population standard deviation over every tree.
    pub fn feature_importances(&self) -> FeatureImportances {
        let n = self.n_features;
        let mut mean = vec![0.0; n];
        let mut used = 0usize;
        for tree in &self.trees {
            let imp = tree.feature_importances();
            if imp.iter().sum::<f64>() <= 0.0 {
                continue;
            }
            used += 1;
            for (acc, v) in mean.iter_mut().zip(imp) {
                *acc += v;
            }
        }
        if used > 0 {
            for value in &mut mean {
                *value /= used as f64;
            }
            let total: f64 = mean.iter().sum();
            if total > 0.0 {
                for value in &mut mean {
                    *value /= total;
                }
            }
        }

        let mut std = vec![0.0; n];
        if !self.trees.is_empty() {
            let count = self.trees.len() as f64;
            for feature in 0..n {
                let values: Vec<f64> = self
                    .trees
                    .iter()
                    .map(|tree| tree.feature_importances()[feature])
                    .collect();
                let avg = values.iter().sum::<f64>() / count;
                let var = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / count;
                std[feature] = var.sqrt();
            }
        }
        FeatureImportances { mean, std }
    }

    fn check_width(&self, features: ArrayView2<'_, f64>) -> Result<(), ForestError> {
        if features.ncols() != self.n_features {
            return Err(ForestError::FeatureMismatch {
                expected: self.n_features,
                found: features.ncols(),
            });
        }
        Ok(())
    }
}
