//! Apply a trained classifier to a directory of new feature records.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::features::{CollectError, CollectParams, CollectRequest, FeatureCollection, collect_features};
use super::train::TrainedClassifier;
use crate::ml::forest::ForestError;
use crate::persist::{self, PersistError};

/// File name of the features collected during application, written next to the result.
pub const COLLECTED_FEATURES_FILE: &str = "actual-collected-features.json";

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(
        "Classifier has no feature names; cannot tell which features to extract from {features_dir}"
    )]
    NoFeatureNames { features_dir: PathBuf },
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Forest(#[from] ForestError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Predictions for every object found in the applied directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Features as collected, columns aligned to the classifier's feature names.
    pub features: FeatureCollection,
    /// Where the collected features were written.
    pub features_path: PathBuf,
    pub classifier: TrainedClassifier,
    pub predicted_labels: Vec<i64>,
    /// Objects x classes, columns ordered like the model's classes.
    #[serde(with = "persist::nan_matrix")]
    pub probabilities: Array2<f64>,
}

impl PredictionResult {
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        persist::save_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self, PersistError> {
        persist::load_json(path)
    }
}

/// Collect features from `features_dir` the way the classifier was trained,
/// predict labels and probabilities, and persist the result to `output_path`.
pub fn apply_classifier(
    classifier: &TrainedClassifier,
    features_dir: &Path,
    output_path: &Path,
    max_objects: Option<usize>,
) -> Result<PredictionResult, ApplyError> {
    let feature_names = classifier.feature_names();
    if feature_names.is_empty() {
        return Err(ApplyError::NoFeatureNames {
            features_dir: features_dir.to_path_buf(),
        });
    }

    let features_path = output_path
        .parent()
        .map_or_else(|| PathBuf::from(COLLECTED_FEATURES_FILE), |dir| {
            dir.join(COLLECTED_FEATURES_FILE)
        });
    let trained = &classifier.collection.params;
    let request = CollectRequest {
        features_dir: features_dir.to_path_buf(),
        magcol: classifier.magcol().to_string(),
        output_path: Some(features_path.clone()),
        params: CollectParams {
            glob: trained.glob.clone(),
            feature_names: feature_names.to_vec(),
            max_objects,
            label_type: trained.label_type,
            missing_labels: trained.missing_labels,
        },
    };
    let collected = collect_features(&request, None)?;
    let features = collected.select_features(feature_names);
    if collected.feature_names.len() < feature_names.len() && !collected.is_empty() {
        tracing::warn!(
            found = collected.feature_names.len(),
            expected = feature_names.len(),
            "Some classifier features were not found; they are treated as missing"
        );
    }

    let workers = classifier.options.workers;
    let predicted_labels = classifier.model.predict(features.features.view(), workers)?;
    let probabilities = classifier
        .model
        .predict_proba(features.features.view(), workers)?;
    tracing::info!(
        objects = features.n_objects(),
        dir = %features_dir.display(),
        "Applied classifier"
    );

    let result = PredictionResult {
        features,
        features_path,
        classifier: classifier.clone(),
        predicted_labels,
        probabilities,
    };
    result.save(output_path)?;
    tracing::info!(path = %output_path.display(), "Wrote predictions");
    Ok(result)
}
