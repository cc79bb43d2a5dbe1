//! Evaluation metrics for classification models.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Confusion matrix over integer class labels.
///
/// Rows are actual classes and columns are predicted classes, both ordered
/// like [`ConfusionMatrix::labels`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Sorted class labels.
    pub labels: Vec<i64>,
    /// Row-major `KxK` counts (`actual * K + predicted`).
    pub counts: Vec<u64>,
}

impl ConfusionMatrix {
    /// Create an empty matrix for the given labels (sorted and deduplicated).
    pub fn new(labels: &[i64]) -> Self {
        let mut labels = labels.to_vec();
        labels.sort_unstable();
        labels.dedup();
        let k = labels.len();
        Self {
            labels,
            counts: vec![0; k * k],
        }
    }

    /// Tally predictions; the label set is the union of both sides.
    pub fn from_predictions(actual: &[i64], predicted: &[i64]) -> Self {
        let all: Vec<i64> = actual.iter().chain(predicted).copied().collect();
        let mut cm = Self::new(&all);
        for (&truth, &guess) in actual.iter().zip(predicted) {
            cm.add(truth, guess);
        }
        cm
    }

    pub fn n_classes(&self) -> usize {
        self.labels.len()
    }

    /// Count one prediction; labels outside the matrix are ignored.
    pub fn add(&mut self, actual: i64, predicted: i64) {
        let (Some(i), Some(j)) = (self.index_of(actual), self.index_of(predicted)) else {
            return;
        };
        let idx = i * self.n_classes() + j;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    /// Count at row `actual`, column `predicted` (indices, not labels).
    pub fn get(&self, actual: usize, predicted: usize) -> u64 {
        self.counts[actual * self.n_classes() + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn max_count(&self) -> u64 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    /// Counts as nested rows, actual class first.
    pub fn rows(&self) -> Vec<Vec<u64>> {
        let k = self.n_classes();
        (0..k)
            .map(|i| self.counts[i * k..(i + 1) * k].to_vec())
            .collect()
    }

    pub fn index_of(&self, label: i64) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Precision/recall statistics for a single class.
pub struct PerClassStats {
    pub label: i64,
    /// `TP / (TP + FP)`, zero when nothing was predicted as this class.
    pub precision: f64,
    /// `TP / (TP + FN)`, zero when the class never occurs.
    pub recall: f64,
    pub f1: f64,
    /// Total number of true examples for the class.
    pub support: u64,
}

/// Compute per-class precision, recall and F1 from a confusion matrix.
pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes();
    let mut stats = Vec::with_capacity(k);
    for class_idx in 0..k {
        let tp = cm.get(class_idx, class_idx) as f64;
        let mut fp = 0f64;
        let mut fn_ = 0f64;
        let mut support = 0u64;
        for j in 0..k {
            let v = cm.get(class_idx, j);
            support = support.saturating_add(v);
            if j != class_idx {
                fn_ += v as f64;
            }
        }
        for i in 0..k {
            if i != class_idx {
                fp += cm.get(i, class_idx) as f64;
            }
        }
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        stats.push(PerClassStats {
            label: cm.labels[class_idx],
            precision,
            recall,
            f1: f1(precision, recall),
            support,
        });
    }
    stats
}

/// Compute overall accuracy from a confusion matrix.
pub fn accuracy(cm: &ConfusionMatrix) -> f64 {
    let k = cm.n_classes();
    let correct: u64 = (0..k).map(|i| cm.get(i, i)).sum();
    ratio(correct as f64, cm.total() as f64)
}

/// How per-class scores were combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Averaging {
    /// Scores of the positive label `1` only.
    Binary,
    /// Unweighted mean over every label seen in either actual or predicted.
    Macro,
}

/// Summary scores for one set of predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub averaging: Averaging,
}

/// Label used as the positive class for binary scores.
pub const POSITIVE_LABEL: i64 = 1;

/// Score predictions: binary scores for the positive label when every label
/// is 0 or 1, macro averages otherwise.
pub fn classification_scores(cm: &ConfusionMatrix) -> ClassificationScores {
    let stats = precision_recall_by_class(cm);
    let is_binary = cm.labels.iter().all(|label| *label == 0 || *label == 1);
    let accuracy = accuracy(cm);
    if is_binary {
        let positive = stats.iter().find(|s| s.label == POSITIVE_LABEL);
        let (precision, recall, f1) = positive.map_or((0.0, 0.0, 0.0), |s| {
            (s.precision, s.recall, s.f1)
        });
        return ClassificationScores {
            precision,
            recall,
            f1,
            accuracy,
            averaging: Averaging::Binary,
        };
    }
    let (precision, recall, f1) = macro_average(&stats);
    ClassificationScores {
        precision,
        recall,
        f1,
        accuracy,
        averaging: Averaging::Macro,
    }
}

fn macro_average(stats: &[PerClassStats]) -> (f64, f64, f64) {
    if stats.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let n = stats.len() as f64;
    (
        stats.iter().map(|s| s.precision).sum::<f64>() / n,
        stats.iter().map(|s| s.recall).sum::<f64>() / n,
        stats.iter().map(|s| s.f1).sum::<f64>() / n,
    )
}

/// Objective maximized during hyperparameter search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
    #[default]
    F1,
    Precision,
    Recall,
    Accuracy,
    F1Macro,
}

impl Scoring {
    pub fn as_str(self) -> &'static str {
        match self {
            Scoring::F1 => "f1",
            Scoring::Precision => "precision",
            Scoring::Recall => "recall",
            Scoring::Accuracy => "accuracy",
            Scoring::F1Macro => "f1_macro",
        }
    }

    /// Score predictions; non-binary labels fall back to macro averages.
    pub fn score(self, actual: &[i64], predicted: &[i64]) -> f64 {
        let cm = ConfusionMatrix::from_predictions(actual, predicted);
        match self {
            Scoring::Accuracy => accuracy(&cm),
            Scoring::F1Macro => macro_average(&precision_recall_by_class(&cm)).2,
            Scoring::F1 => classification_scores(&cm).f1,
            Scoring::Precision => classification_scores(&cm).precision,
            Scoring::Recall => classification_scores(&cm).recall,
        }
    }
}

impl fmt::Display for Scoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scoring {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "f1" => Ok(Scoring::F1),
            "precision" => Ok(Scoring::Precision),
            "recall" => Ok(Scoring::Recall),
            "accuracy" => Ok(Scoring::Accuracy),
            "f1_macro" => Ok(Scoring::F1Macro),
            other => Err(format!(
                "Unknown scoring '{other}' (expected f1, precision, recall, accuracy or f1_macro)"
            )),
        }
    }
}

fn ratio(num: f64, denom: f64) -> f64 {
    if denom == 0.0 { 0.0 } else { num / denom }
}

fn f1(precision: f64, recall: f64) -> f64 {
    ratio(2.0 * precision * recall, precision + recall)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_actual_and_columns_predicted() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1, 1, 1], &[0, 1, 1, 1, 0]);
        assert_eq!(cm.labels, vec![0, 1]);
        assert_eq!(cm.rows(), vec![vec![1, 1], vec![1, 2]]);
        assert_eq!(cm.total(), 5);
        assert_eq!(cm.max_count(), 2);
    }

    #[test]
    fn binary_scores_use_positive_label() {
        // tp = 2, fp = 1, fn = 1
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1, 1, 1], &[0, 1, 1, 1, 0]);
        let scores = classification_scores(&cm);
        assert_eq!(scores.averaging, Averaging::Binary);
        assert!((scores.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((scores.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((scores.f1 - 2.0 / 3.0).abs() < 1e-12);
        assert!((scores.accuracy - 0.6).abs() < 1e-12);
    }

    #[test]
    fn no_positive_predictions_score_zero() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1, 1], &[0, 0, 0]);
        let scores = classification_scores(&cm);
        assert_eq!(scores.precision, 0.0);
        assert_eq!(scores.recall, 0.0);
        assert_eq!(scores.f1, 0.0);
    }

    #[test]
    fn multiclass_labels_use_macro_average() {
        let cm = ConfusionMatrix::from_predictions(&[1, 2, 3], &[1, 2, 2]);
        let scores = classification_scores(&cm);
        assert_eq!(scores.averaging, Averaging::Macro);
        // per class precision: 1, 0.5, 0
        assert!((scores.precision - 0.5).abs() < 1e-12);
        assert!((scores.recall - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn scoring_parses_names() {
        assert_eq!("F1".parse::<Scoring>().unwrap(), Scoring::F1);
        assert_eq!("f1_macro".parse::<Scoring>().unwrap(), Scoring::F1Macro);
        assert!("roc_auc".parse::<Scoring>().is_err());
        assert_eq!(Scoring::Accuracy.score(&[0, 1, 1, 0], &[0, 1, 0, 0]), 0.75);
    }
}
