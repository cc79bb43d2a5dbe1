//! Train a random forest classifier on collected features.

use std::path::{Path, PathBuf};

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use super::features::FeatureCollection;
use super::search::{CvReport, SearchError, SearchOptions, SearchSpace, describe, randomized_search};
use super::split::{SplitError, stratified_split};
use crate::ml::forest::{FeatureImportances, ForestError, ForestParams, RandomForest, fit_forest};
use crate::ml::metrics::{
    Averaging, ConfusionMatrix, Scoring, classification_scores,
};
use crate::persist::{self, PersistError};

/// Default seed for splits, folds, sampling and bootstrapping.
pub const DEFAULT_SEED: u64 = 0xdecaff;

/// Training settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOptions {
    pub test_fraction: f64,
    pub cv_iterations: usize,
    pub cv_folds: usize,
    pub scoring: Scoring,
    /// Persist the trained bundle here when set.
    pub output_path: Option<PathBuf>,
    /// Worker threads; `0` uses every available core.
    pub workers: usize,
    pub seed: u64,
    pub search_space: SearchSpace,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            test_fraction: 0.25,
            cv_iterations: 20,
            cv_folds: 5,
            scoring: Scoring::F1,
            output_path: None,
            workers: 0,
            seed: DEFAULT_SEED,
            search_space: SearchSpace::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("Feature collection has no labels; collect it with a label map")]
    MissingLabels,
    #[error("Feature collection has {rows} rows but {labels} labels")]
    LabelCountMismatch { rows: usize, labels: usize },
    #[error("Feature collection has no features to train on")]
    NoFeatures,
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Forest(#[from] ForestError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// The exact train/test partition used for fitting and evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    #[serde(with = "persist::nan_matrix")]
    pub train_features: Array2<f64>,
    pub train_labels: Vec<i64>,
    #[serde(with = "persist::nan_matrix")]
    pub test_features: Array2<f64>,
    pub test_labels: Vec<i64>,
}

/// Scores of the best model on the held-out test split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub averaging: Averaging,
    /// Rows are actual classes, columns predicted classes.
    pub confusion_matrix: ConfusionMatrix,
}

/// A trained model with everything needed to reproduce, apply or plot it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedClassifier {
    pub model: RandomForest,
    pub best_params: ForestParams,
    pub best_score: f64,
    pub cv_report: CvReport,
    pub split: DataSplit,
    pub metrics: EvaluationMetrics,
    pub options: TrainOptions,
    /// The training collection: ids, feature names, matrix, labels and how it was collected.
    pub collection: FeatureCollection,
}

impl TrainedClassifier {
    pub fn feature_names(&self) -> &[String] {
        &self.collection.feature_names
    }

    pub fn magcol(&self) -> &str {
        &self.collection.magcol
    }

    pub fn feature_importances(&self) -> FeatureImportances {
        self.model.feature_importances()
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        persist::save_json(path, self)
    }

    /// Load a bundle written by [`TrainedClassifier::save`].
    pub fn load(path: &Path) -> Result<Self, PersistError> {
        let classifier: Self = persist::load_json(path)?;
        classifier.model.validate().map_err(|err| PersistError::Parse {
            path: path.to_path_buf(),
            source: serde::de::Error::custom(err.to_string()),
        })?;
        Ok(classifier)
    }
}

/// Split, search hyperparameters by cross-validation, refit and evaluate.
pub fn train_classifier(
    collection: &FeatureCollection,
    options: &TrainOptions,
) -> Result<TrainedClassifier, TrainError> {
    let labels = collection.labels.as_ref().ok_or(TrainError::MissingLabels)?;
    let n = collection.features.nrows();
    if labels.len() != n {
        return Err(TrainError::LabelCountMismatch {
            rows: n,
            labels: labels.len(),
        });
    }
    if collection.features.ncols() == 0 {
        return Err(TrainError::NoFeatures);
    }

    let indices = stratified_split(labels, options.test_fraction, options.seed)?;
    let split = DataSplit {
        train_features: collection.features.select(Axis(0), &indices.train),
        train_labels: indices.train.iter().map(|&i| labels[i]).collect(),
        test_features: collection.features.select(Axis(0), &indices.test),
        test_labels: indices.test.iter().map(|&i| labels[i]).collect(),
        train_indices: indices.train,
        test_indices: indices.test,
    };
    tracing::info!(
        train = split.train_labels.len(),
        test = split.test_labels.len(),
        features = collection.feature_names.len(),
        "Split training set"
    );

    tracing::info!("Running randomized CV search to optimize RF hyperparameters");
    let search = SearchOptions {
        iterations: options.cv_iterations,
        folds: options.cv_folds,
        scoring: options.scoring,
        workers: options.workers,
        seed: options.seed,
    };
    let cv_report = randomized_search(
        split.train_features.view(),
        &split.train_labels,
        &options.search_space,
        &search,
    )?;
    cv_report.log_top(3);

    let best = cv_report.best();
    let best_params = best.params.clone();
    let best_score = best.mean_score;
    let model = fit_forest(
        split.train_features.view(),
        &split.train_labels,
        &best_params,
        options.workers,
    )?;

    let predicted = model.predict(split.test_features.view(), options.workers)?;
    let confusion_matrix = ConfusionMatrix::from_predictions(&split.test_labels, &predicted);
    let scores = classification_scores(&confusion_matrix);
    tracing::info!(
        precision = scores.precision,
        recall = scores.recall,
        f1 = scores.f1,
        accuracy = scores.accuracy,
        params = %describe(&best_params),
        "Evaluated best classifier on test split"
    );

    let classifier = TrainedClassifier {
        model,
        best_params,
        best_score,
        cv_report,
        split,
        metrics: EvaluationMetrics {
            precision: scores.precision,
            recall: scores.recall,
            f1: scores.f1,
            accuracy: scores.accuracy,
            averaging: scores.averaging,
            confusion_matrix,
        },
        options: options.clone(),
        collection: collection.clone(),
    };
    if let Some(path) = &options.output_path {
        classifier.save(path)?;
        tracing::info!(path = %path.display(), "Wrote trained classifier");
    }
    Ok(classifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varclass::features::CollectParams;

    fn collection(labels: Option<Vec<i64>>) -> FeatureCollection {
        let n = 24;
        let mut features = Array2::zeros((n, 2));
        for i in 0..n {
            features[(i, 0)] = (i % 2) as f64 * 5.0 + (i % 4) as f64 * 0.1;
            features[(i, 1)] = f64::NAN;
        }
        FeatureCollection {
            object_ids: (0..n).map(|i| format!("obj-{i}")).collect(),
            feature_names: vec!["stetsonj".into(), "mad".into()],
            features,
            labels,
            magcol: "aep_000".into(),
            params: CollectParams::default(),
        }
    }

    fn quick_options() -> TrainOptions {
        TrainOptions {
            cv_iterations: 2,
            cv_folds: 3,
            workers: 2,
            search_space: SearchSpace {
                max_depth: vec![None],
                n_estimators: (5, 8),
                max_features: (1, 3),
                min_samples_split: (2, 3),
                min_samples_leaf: (1, 2),
            },
            ..TrainOptions::default()
        }
    }

    #[test]
    fn unlabeled_collection_is_rejected() {
        assert!(matches!(
            train_classifier(&collection(None), &quick_options()),
            Err(TrainError::MissingLabels)
        ));
    }

    #[test]
    fn sparse_minority_class_survives_cross_validation() {
        let labels = vec![0, 0, 0, 0, 0, 0, 1, 1];
        let mut data = collection(None);
        data.object_ids.truncate(8);
        data.features = data.features.slice(ndarray::s![..8, ..]).to_owned();
        for (row, label) in labels.iter().enumerate() {
            data.features[(row, 0)] = *label as f64 * 5.0 + row as f64 * 0.1;
        }
        data.labels = Some(labels);
        let options = TrainOptions {
            test_fraction: 0.5,
            cv_folds: 2,
            ..quick_options()
        };

        let classifier = train_classifier(&data, &options).unwrap();
        assert_eq!(classifier.split.test_indices.len(), 4);
        assert_eq!(classifier.cv_report.candidates.len(), 2);
        assert!(
            classifier
                .cv_report
                .candidates
                .iter()
                .all(|c| c.fold_scores.len() == 2)
        );
    }

    #[test]
    fn trains_and_evaluates_binary_task() {
        let labels: Vec<i64> = (0..24).map(|i| (i % 2) as i64).collect();
        let classifier = train_classifier(&collection(Some(labels)), &quick_options()).unwrap();
        assert_eq!(classifier.split.test_indices.len(), 6);
        assert_eq!(classifier.split.train_indices.len(), 18);
        assert_eq!(classifier.metrics.averaging, Averaging::Binary);
        assert_eq!(classifier.metrics.confusion_matrix.labels, vec![0, 1]);
        assert_eq!(classifier.metrics.confusion_matrix.total(), 6);
        assert_eq!(classifier.metrics.f1, 1.0);
        assert_eq!(classifier.cv_report.candidates.len(), 2);
        assert_eq!(classifier.feature_names(), &["stetsonj", "mad"]);
    }

    #[test]
    fn label_count_must_match_rows() {
        let result = train_classifier(&collection(Some(vec![0, 1])), &quick_options());
        assert!(matches!(
            result,
            Err(TrainError::LabelCountMismatch { rows: 24, labels: 2 })
        ));
    }
}
