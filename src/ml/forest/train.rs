use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::model::RandomForest;
use super::tree::{DecisionTree, TreeLimits};
use super::{ForestError, ForestParams};
use crate::ml::workers::map_indexed;

/// Fit a random forest on `features` (rows are samples) and integer `labels`.
///
/// Missing values are encoded as NaN and always follow the right branch.
pub fn fit_forest(
    features: ArrayView2<'_, f64>,
    labels: &[i64],
    params: &ForestParams,
    workers: usize,
) -> Result<RandomForest, ForestError> {
    let n = features.nrows();
    if n == 0 || features.ncols() == 0 {
        return Err(ForestError::EmptyDataset);
    }
    if labels.len() != n {
        return Err(ForestError::LengthMismatch {
            rows: n,
            labels: labels.len(),
        });
    }
    if params.n_estimators == 0 {
        return Err(ForestError::InvalidParam(
            "n_estimators must be at least 1".to_string(),
        ));
    }
    if params.max_features == Some(0) {
        return Err(ForestError::InvalidParam(
            "max_features must be at least 1".to_string(),
        ));
    }

    let mut classes = labels.to_vec();
    classes.sort_unstable();
    classes.dedup();
    if classes.len() < 2 {
        return Err(ForestError::TooFewClasses {
            found: classes.len(),
        });
    }
    let targets: Vec<usize> = labels
        .iter()
        .map(|label| classes.binary_search(label).unwrap_or(0))
        .collect();

    let n_features = features.ncols();
    let limits = TreeLimits {
        max_depth: params.max_depth,
        max_features: resolve_max_features(params.max_features, n_features),
        min_samples_split: params.min_samples_split.max(2),
        min_samples_leaf: params.min_samples_leaf.max(1),
    };
    let n_classes = classes.len();

    let trees = map_indexed(params.n_estimators, workers, |tree_idx| {
        let mut rng = StdRng::seed_from_u64(tree_seed(params.seed, tree_idx));
        let samples: Vec<usize> = if params.bootstrap {
            (0..n).map(|_| rng.random_range(0..n)).collect()
        } else {
            (0..n).collect()
        };
        DecisionTree::fit(features, &targets, n_classes, samples, limits, &mut rng)
    });

    tracing::debug!(
        trees = trees.len(),
        rows = n,
        features = n_features,
        classes = n_classes,
        "Fitted random forest"
    );
    Ok(RandomForest {
        params: params.clone(),
        classes,
        n_features,
        trees,
    })
}

fn resolve_max_features(requested: Option<usize>, n_features: usize) -> usize {
    let value = requested.unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize);
    value.clamp(1, n_features.max(1))
}

fn tree_seed(seed: u64, tree_idx: usize) -> u64 {
    seed ^ (tree_idx as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn two_blobs(n_per_class: usize) -> (Array2<f64>, Vec<i64>) {
        let mut x = Array2::zeros((2 * n_per_class, 3));
        let mut y = Vec::with_capacity(2 * n_per_class);
        for i in 0..2 * n_per_class {
            let class = (i >= n_per_class) as i64;
            let jitter = (i % 7) as f64 * 0.1;
            x[(i, 0)] = class as f64 * 4.0 + jitter;
            x[(i, 1)] = jitter;
            x[(i, 2)] = (i % 3) as f64;
            y.push(class);
        }
        (x, y)
    }

    fn params() -> ForestParams {
        ForestParams {
            n_estimators: 25,
            max_features: Some(2),
            seed: 11,
            ..ForestParams::default()
        }
    }

    #[test]
    fn fits_and_predicts_separable_blobs() {
        let (x, y) = two_blobs(30);
        let forest = fit_forest(x.view(), &y, &params(), 2).unwrap();
        forest.validate().unwrap();
        assert_eq!(forest.classes(), &[0, 1]);
        assert_eq!(forest.predict(x.view(), 2).unwrap(), y);
        let proba = forest.predict_proba(x.view(), 1).unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn worker_count_does_not_change_the_model() {
        let (x, y) = two_blobs(20);
        let single = fit_forest(x.view(), &y, &params(), 1).unwrap();
        let many = fit_forest(x.view(), &y, &params(), 4).unwrap();
        assert_eq!(single, many);
    }

    #[test]
    fn informative_feature_dominates_importances() {
        let (x, y) = two_blobs(30);
        let forest = fit_forest(x.view(), &y, &params(), 0).unwrap();
        let importances = forest.feature_importances();
        assert_eq!(importances.mean.len(), 3);
        assert!((importances.mean.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances.mean[0] > importances.mean[2]);
        assert!(importances.std.iter().all(|s| *s >= 0.0));
    }

    #[test]
    fn rejects_single_class_and_bad_shapes() {
        let x = Array2::zeros((4, 2));
        assert!(matches!(
            fit_forest(x.view(), &[1, 1, 1, 1], &params(), 1),
            Err(ForestError::TooFewClasses { found: 1 })
        ));
        assert!(matches!(
            fit_forest(x.view(), &[0, 1], &params(), 1),
            Err(ForestError::LengthMismatch { rows: 4, labels: 2 })
        ));
        let (x, y) = two_blobs(5);
        let forest = fit_forest(x.view(), &y, &params(), 1).unwrap();
        let narrow = Array2::<f64>::zeros((1, 2));
        assert!(matches!(
            forest.predict(narrow.view(), 1),
            Err(ForestError::FeatureMismatch { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn default_max_features_is_sqrt_of_width() {
        assert_eq!(resolve_max_features(None, 16), 4);
        assert_eq!(resolve_max_features(None, 1), 1);
        assert_eq!(resolve_max_features(Some(9), 3), 3);
    }
}
