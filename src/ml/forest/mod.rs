//! Random forest classifier built from bootstrapped Gini trees.
//!
//! Trees are grown independently on scoped worker threads, each from its own
//! seed derived from [`ForestParams::seed`], so a fitted forest depends only on
//! the data and the parameters, never on the worker count.

mod model;
mod train;
mod tree;

pub use model::{FeatureImportances, RandomForest};
pub use train::fit_forest;
pub use tree::{DecisionTree, Node, TreeLimits};

use serde::{Deserialize, Serialize};

/// Hyperparameters of a random forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees.
    pub n_estimators: usize,
    /// Maximum tree depth; `None` is unlimited.
    pub max_depth: Option<usize>,
    /// Features considered per split; `None` uses `sqrt(n_features)`.
    pub max_features: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Grow each tree on a bootstrap resample of the rows.
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            max_features: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            bootstrap: true,
            seed: 0,
        }
    }
}

/// Errors raised while fitting or evaluating a forest.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    #[error("Cannot fit a forest on an empty dataset")]
    EmptyDataset,
    #[error("Feature matrix has {rows} rows but {labels} labels were given")]
    LengthMismatch { rows: usize, labels: usize },
    #[error("Need at least 2 classes to fit a classifier, found {found}")]
    TooFewClasses { found: usize },
    #[error("Invalid forest parameter: {0}")]
    InvalidParam(String),
    #[error("Forest expects {expected} features, got {found}")]
    FeatureMismatch { expected: usize, found: usize },
    #[error("Invalid forest model: {0}")]
    InvalidModel(String),
}
