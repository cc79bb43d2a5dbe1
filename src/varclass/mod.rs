//! Random-forest variable star classification over precomputed light-curve features.
//!
//! The pipeline runs [`collect_features`] on a directory of per-object feature
//! records, trains a classifier with [`train_classifier`], then either applies
//! it to new records with [`apply_classifier`] or renders its evaluation with
//! [`plot_training_results`].

pub mod apply;
pub mod features;
pub mod labels;
pub mod plot;
pub mod search;
pub mod split;
pub mod train;

pub use apply::{ApplyError, COLLECTED_FEATURES_FILE, PredictionResult, apply_classifier};
pub use features::{
    CollectError, CollectParams, CollectRequest, DEFAULT_FEATURE_GLOB, FeatureCollection,
    NONPERIODIC_FEATURES, collect_features,
};
pub use labels::{LabelMap, LabelType, LabelValue, MissingLabelPolicy, load_label_map};
pub use plot::{PlotError, plot_training_results, render_training_results};
pub use search::{CvCandidate, CvReport, SearchSpace};
pub use split::{SplitError, SplitIndices, stratified_kfold, stratified_split};
pub use train::{
    DEFAULT_SEED, DataSplit, EvaluationMetrics, TrainError, TrainOptions, TrainedClassifier,
    train_classifier,
};
