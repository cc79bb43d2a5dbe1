mod support;

use std::collections::BTreeMap;
use std::path::Path;

use astrobase::ml::metrics::Scoring;
use astrobase::varclass::{
    ApplyError, COLLECTED_FEATURES_FILE, CollectRequest, FeatureCollection, PlotError,
    PredictionResult, SearchSpace, TrainOptions, TrainedClassifier, apply_classifier,
    collect_features, load_label_map, plot_training_results, train_classifier,
};
use ndarray::Array2;
use support::fixtures::{write_feature_record, write_population};
use tempfile::tempdir;

const MAGCOL: &str = "aep_000";

fn quick_options(output: &Path) -> TrainOptions {
    TrainOptions {
        cv_iterations: 3,
        cv_folds: 3,
        scoring: Scoring::F1,
        output_path: Some(output.to_path_buf()),
        workers: 2,
        search_space: SearchSpace {
            max_depth: vec![None],
            n_estimators: (10, 16),
            max_features: (1, 3),
            min_samples_split: (2, 3),
            min_samples_leaf: (1, 2),
        },
        ..TrainOptions::default()
    }
}

fn write_labels(path: &Path, population: &[(String, bool)]) {
    let labels: BTreeMap<&str, bool> = population
        .iter()
        .map(|(id, variable)| (id.as_str(), *variable))
        .collect();
    std::fs::write(path, serde_json::to_vec(&labels).unwrap()).unwrap();
}

fn collect_training_set(root: &Path) -> FeatureCollection {
    let train_dir = root.join("train");
    std::fs::create_dir_all(&train_dir).unwrap();
    let population = write_population(&train_dir, MAGCOL, 40, "train-");
    let labels_path = root.join("labels.json");
    write_labels(&labels_path, &population);

    let labels = load_label_map(&labels_path).unwrap();
    let mut request = CollectRequest::new(&train_dir, MAGCOL);
    request.params.feature_names = ["stetsonj", "mad", "skew", "kurtosis", "amplitude"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    request.output_path = Some(root.join("collected.json"));
    collect_features(&request, Some(&labels)).unwrap()
}

/// Element-wise equality where NaN matches NaN.
fn assert_same_matrix(left: &Array2<f64>, right: &Array2<f64>) {
    assert_eq!(left.dim(), right.dim());
    for ((position, a), b) in left.indexed_iter().zip(right.iter()) {
        assert!(
            a == b || (a.is_nan() && b.is_nan()),
            "mismatch at {position:?}: {a} != {b}"
        );
    }
}

#[test]
fn collect_train_apply_and_plot() {
    let root = tempdir().unwrap();
    let collection = collect_training_set(root.path());
    assert_eq!(collection.n_objects(), 40);
    assert_eq!(
        collection.feature_names,
        vec!["stetsonj", "mad", "skew", "kurtosis"]
    );
    let labels = collection.labels.as_ref().unwrap();
    assert_eq!(labels.iter().filter(|&&label| label == 1).count(), 20);

    let stored = FeatureCollection::load(&root.path().join("collected.json")).unwrap();
    assert_eq!(stored.object_ids, collection.object_ids);
    assert_eq!(stored.feature_names, collection.feature_names);
    assert_eq!(stored.labels, collection.labels);
    assert_eq!(stored.magcol, collection.magcol);
    assert_eq!(stored.params, collection.params);
    assert_same_matrix(&stored.features, &collection.features);
    assert!(stored.features[(0, 3)].is_nan());

    let bundle_path = root.path().join("classifier.json");
    let classifier = train_classifier(&collection, &quick_options(&bundle_path)).unwrap();
    assert_eq!(classifier.split.test_indices.len(), 10);
    assert_eq!(classifier.metrics.confusion_matrix.total(), 10);
    assert!(classifier.metrics.accuracy >= 0.8, "{:?}", classifier.metrics);
    assert_eq!(classifier.cv_report.candidates.len(), 3);
    let importances = classifier.feature_importances();
    assert_eq!(importances.mean.len(), 4);
    assert_eq!(importances.mean[3], 0.0);

    let loaded = TrainedClassifier::load(&bundle_path).unwrap();
    assert_eq!(loaded.model, classifier.model);
    assert_eq!(loaded.best_params, classifier.best_params);
    assert_eq!(loaded.metrics, classifier.metrics);
    assert_eq!(loaded.feature_names(), classifier.feature_names());

    let apply_dir = root.path().join("new");
    std::fs::create_dir_all(&apply_dir).unwrap();
    let fresh = write_population(&apply_dir, MAGCOL, 10, "new-");
    write_feature_record(
        &apply_dir,
        "other-magcol",
        "aep_001",
        serde_json::json!({ "stetsonj": 1.0 }),
    );
    let output = root.path().join("out").join("predictions.json");
    let result = apply_classifier(&loaded, &apply_dir, &output, None).unwrap();
    assert_eq!(result.features.n_objects(), 10);
    assert_eq!(result.predicted_labels.len(), 10);
    assert_eq!(result.probabilities.dim(), (10, 2));
    for row in result.probabilities.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-9);
    }
    assert_eq!(
        result.features_path,
        root.path().join("out").join(COLLECTED_FEATURES_FILE)
    );
    assert!(result.features_path.exists());
    let correct = fresh
        .iter()
        .zip(&result.predicted_labels)
        .filter(|((_, variable), label)| i64::from(*variable) == **label)
        .count();
    assert!(correct >= 8, "only {correct} of 10 correct");

    let reloaded = PredictionResult::load(&output).unwrap();
    assert_eq!(reloaded.predicted_labels, result.predicted_labels);
    assert_eq!(reloaded.features.object_ids, result.features.object_ids);

    let plot_path = root.path().join("plots").join("results.png");
    let written = plot_training_results(
        &classifier,
        &["constant".to_string(), "variable".to_string()],
        &plot_path,
    )
    .unwrap();
    assert_eq!(written, plot_path);
    let image = image::open(&plot_path).unwrap();
    assert!(image.width() > 0 && image.height() > 0);

    let err = plot_training_results(&classifier, &["only".to_string()], &plot_path).unwrap_err();
    assert!(matches!(
        err,
        PlotError::LabelCount {
            expected: 2,
            found: 1
        }
    ));
}

#[test]
fn applying_to_an_empty_directory_predicts_nothing() {
    let root = tempdir().unwrap();
    let collection = collect_training_set(root.path());
    let classifier =
        train_classifier(&collection, &quick_options(&root.path().join("clf.json"))).unwrap();

    let empty = root.path().join("empty");
    std::fs::create_dir_all(&empty).unwrap();
    let result =
        apply_classifier(&classifier, &empty, &root.path().join("empty-out.json"), None).unwrap();
    assert!(result.predicted_labels.is_empty());
    assert_eq!(result.probabilities.dim(), (0, 2));
    assert_eq!(result.features.feature_names, classifier.feature_names());
}

#[test]
fn classifier_without_feature_names_cannot_be_applied() {
    let root = tempdir().unwrap();
    let collection = collect_training_set(root.path());
    let mut classifier =
        train_classifier(&collection, &quick_options(&root.path().join("clf.json"))).unwrap();
    classifier.collection.feature_names.clear();

    let err = apply_classifier(
        &classifier,
        &root.path().join("train"),
        &root.path().join("never.json"),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, ApplyError::NoFeatureNames { .. }));
    assert!(!root.path().join("never.json").exists());
}

#[test]
fn max_objects_limits_applied_records() {
    let root = tempdir().unwrap();
    let collection = collect_training_set(root.path());
    let classifier =
        train_classifier(&collection, &quick_options(&root.path().join("clf.json"))).unwrap();

    let result = apply_classifier(
        &classifier,
        &root.path().join("train"),
        &root.path().join("limited.json"),
        Some(5),
    )
    .unwrap();
    assert_eq!(result.predicted_labels.len(), 5);
    assert_eq!(result.features.object_ids[0], "train-000");
}
