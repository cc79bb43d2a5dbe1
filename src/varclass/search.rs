//! Randomized hyperparameter search scored by stratified cross-validation.

use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::split::{SplitError, stratified_kfold};
use crate::ml::forest::{ForestError, ForestParams, fit_forest};
use crate::ml::metrics::Scoring;

/// Distributions sampled by the randomized search; integer ranges are half-open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub max_depth: Vec<Option<usize>>,
    pub n_estimators: (usize, usize),
    pub max_features: (usize, usize),
    pub min_samples_split: (usize, usize),
    pub min_samples_leaf: (usize, usize),
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            max_depth: vec![Some(3), Some(4), Some(5), None],
            n_estimators: (100, 2000),
            max_features: (1, 5),
            min_samples_split: (2, 11),
            min_samples_leaf: (2, 11),
        }
    }
}

impl SearchSpace {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_depth.is_empty() {
            return Err("max_depth choices must not be empty".to_string());
        }
        for (name, (low, high)) in [
            ("n_estimators", self.n_estimators),
            ("max_features", self.max_features),
            ("min_samples_split", self.min_samples_split),
            ("min_samples_leaf", self.min_samples_leaf),
        ] {
            if low >= high {
                return Err(format!("{name} range [{low}, {high}) is empty"));
            }
            if low == 0 && name != "min_samples_leaf" {
                return Err(format!("{name} range must start at 1 or more"));
            }
        }
        Ok(())
    }

    /// Draw one configuration; every candidate shares `forest_seed`.
    pub fn sample<R: Rng>(&self, rng: &mut R, forest_seed: u64) -> ForestParams {
        ForestParams {
            max_depth: self.max_depth.choose(rng).copied().flatten(),
            n_estimators: rng.random_range(self.n_estimators.0..self.n_estimators.1),
            max_features: Some(rng.random_range(self.max_features.0..self.max_features.1)),
            min_samples_split: rng
                .random_range(self.min_samples_split.0..self.min_samples_split.1),
            min_samples_leaf: rng.random_range(self.min_samples_leaf.0..self.min_samples_leaf.1),
            bootstrap: true,
            seed: forest_seed,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid search space: {0}")]
    InvalidSpace(String),
    #[error("Need at least 1 search iteration")]
    NoIterations,
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Forest(#[from] ForestError),
}

/// Settings shared by every candidate of one search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub iterations: usize,
    pub folds: usize,
    pub scoring: Scoring,
    pub workers: usize,
    pub seed: u64,
}

/// Cross-validation outcome of one sampled configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvCandidate {
    pub params: ForestParams,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
    /// 1 is best; tied scores share a rank.
    pub rank: usize,
}

/// Every candidate in sampling order plus the winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvReport {
    pub scoring: Scoring,
    pub candidates: Vec<CvCandidate>,
    pub best_index: usize,
}

impl CvReport {
    pub fn best(&self) -> &CvCandidate {
        &self.candidates[self.best_index]
    }

    /// Candidates with rank `1..=n_top`, best first.
    pub fn top(&self, n_top: usize) -> Vec<&CvCandidate> {
        let mut ranked: Vec<&CvCandidate> = self
            .candidates
            .iter()
            .filter(|candidate| candidate.rank <= n_top)
            .collect();
        ranked.sort_by_key(|candidate| candidate.rank);
        ranked
    }

    /// Log the top-ranked candidates.
    pub fn log_top(&self, n_top: usize) {
        for candidate in self.top(n_top) {
            tracing::info!("Model with rank: {}", candidate.rank);
            tracing::info!(
                "Mean validation score: {:.3} (std: {:.3})",
                candidate.mean_score,
                candidate.std_score
            );
            tracing::info!("Parameters: {}", describe(&candidate.params));
        }
    }
}

/// Sample `options.iterations` configurations and score each by k-fold CV.
///
/// The best mean score wins; the earliest candidate wins ties.
pub fn randomized_search(
    features: ArrayView2<'_, f64>,
    labels: &[i64],
    space: &SearchSpace,
    options: &SearchOptions,
) -> Result<CvReport, SearchError> {
    space.validate().map_err(SearchError::InvalidSpace)?;
    if options.iterations == 0 {
        return Err(SearchError::NoIterations);
    }
    let folds = stratified_kfold(labels, options.folds, options.seed)?;
    let mut rng = StdRng::seed_from_u64(options.seed);
    let fold_data: Vec<FoldData> = folds
        .iter()
        .map(|fold| FoldData {
            train_x: features.select(Axis(0), &fold.train),
            train_y: fold.train.iter().map(|&i| labels[i]).collect(),
            test_x: features.select(Axis(0), &fold.test),
            test_y: fold.test.iter().map(|&i| labels[i]).collect(),
        })
        .collect();

    let mut candidates = Vec::with_capacity(options.iterations);
    for iteration in 0..options.iterations {
        let params = space.sample(&mut rng, options.seed);
        let mut fold_scores = Vec::with_capacity(fold_data.len());
        for (fold_index, fold) in fold_data.iter().enumerate() {
            let forest =
                match fit_forest(fold.train_x.view(), &fold.train_y, &params, options.workers) {
                    Ok(forest) => forest,
                    Err(ForestError::TooFewClasses { found }) => {
                        tracing::warn!(
                            iteration,
                            fold = fold_index,
                            classes = found,
                            "Fold training split has a single class, scoring it 0"
                        );
                        fold_scores.push(0.0);
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };
            let predicted = forest.predict(fold.test_x.view(), options.workers)?;
            fold_scores.push(options.scoring.score(&fold.test_y, &predicted));
        }
        let (mean_score, std_score) = mean_std(&fold_scores);
        tracing::debug!(
            iteration,
            mean_score,
            std_score,
            params = %describe(&params),
            "Scored candidate"
        );
        candidates.push(CvCandidate {
            params,
            fold_scores,
            mean_score,
            std_score,
            rank: 0,
        });
    }

    let means: Vec<f64> = candidates.iter().map(|c| c.mean_score).collect();
    for candidate in &mut candidates {
        candidate.rank = 1 + means.iter().filter(|&&m| m > candidate.mean_score).count();
    }
    let mut best_index = 0;
    for (idx, candidate) in candidates.iter().enumerate() {
        if candidate.mean_score > candidates[best_index].mean_score {
            best_index = idx;
        }
    }
    Ok(CvReport {
        scoring: options.scoring,
        candidates,
        best_index,
    })
}

struct FoldData {
    train_x: Array2<f64>,
    train_y: Vec<i64>,
    test_x: Array2<f64>,
    test_y: Vec<i64>,
}

/// One-line summary of forest hyperparameters.
pub fn describe(params: &ForestParams) -> String {
    let depth = params
        .max_depth
        .map_or_else(|| "none".to_string(), |depth| depth.to_string());
    let features = params
        .max_features
        .map_or_else(|| "sqrt".to_string(), |features| features.to_string());
    format!(
        "max_depth={depth}, n_estimators={}, max_features={features}, min_samples_split={}, min_samples_leaf={}",
        params.n_estimators, params.min_samples_split, params.min_samples_leaf
    )
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_space() -> SearchSpace {
        SearchSpace {
            max_depth: vec![Some(2), None],
            n_estimators: (5, 12),
            max_features: (1, 3),
            min_samples_split: (2, 4),
            min_samples_leaf: (1, 3),
        }
    }

    fn dataset() -> (Array2<f64>, Vec<i64>) {
        let n = 40;
        let mut x = Array2::zeros((n, 2));
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let class = (i % 2) as i64;
            x[(i, 0)] = class as f64 * 3.0 + (i % 5) as f64 * 0.2;
            x[(i, 1)] = (i % 3) as f64;
            y.push(class);
        }
        (x, y)
    }

    #[test]
    fn samples_stay_inside_the_space() {
        let space = SearchSpace::default();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let params = space.sample(&mut rng, 9);
            assert!((100..2000).contains(&params.n_estimators));
            assert!((1..5).contains(&params.max_features.unwrap()));
            assert!((2..11).contains(&params.min_samples_split));
            assert!((2..11).contains(&params.min_samples_leaf));
            assert!(matches!(params.max_depth, None | Some(3..=5)));
            assert_eq!(params.seed, 9);
        }
    }

    #[test]
    fn search_ranks_candidates_and_picks_the_best() {
        let (x, y) = dataset();
        let options = SearchOptions {
            iterations: 4,
            folds: 3,
            scoring: Scoring::F1,
            workers: 2,
            seed: 0xdecaff,
        };
        let report = randomized_search(x.view(), &y, &small_space(), &options).unwrap();
        assert_eq!(report.candidates.len(), 4);
        let best = report.best();
        assert_eq!(best.rank, 1);
        assert!(report.candidates.iter().all(|c| c.mean_score <= best.mean_score));
        assert!(report.candidates.iter().all(|c| c.fold_scores.len() == 3));
        assert!(best.mean_score > 0.9);
        assert_eq!(report.top(1)[0].rank, 1);
    }

    #[test]
    fn empty_ranges_are_rejected() {
        let mut space = small_space();
        space.n_estimators = (10, 10);
        assert!(space.validate().is_err());
        let (x, y) = dataset();
        let options = SearchOptions {
            iterations: 0,
            folds: 3,
            scoring: Scoring::F1,
            workers: 1,
            seed: 1,
        };
        assert!(matches!(
            randomized_search(x.view(), &y, &small_space(), &options),
            Err(SearchError::NoIterations)
        ));
    }

    #[test]
    fn single_class_training_fold_scores_zero() {
        let x = Array2::from_shape_fn((6, 2), |(row, col)| (row * 2 + col) as f64);
        let y = [0, 0, 0, 0, 0, 1];
        let options = SearchOptions {
            iterations: 2,
            folds: 2,
            scoring: Scoring::F1,
            workers: 1,
            seed: 3,
        };
        let report = randomized_search(x.view(), &y, &small_space(), &options).unwrap();
        assert_eq!(report.candidates.len(), 2);
        for candidate in &report.candidates {
            assert_eq!(candidate.fold_scores.len(), 2);
            assert_eq!(candidate.fold_scores[1], 0.0);
        }
    }

    #[test]
    fn mean_std_uses_population_spread() {
        let (mean, std) = mean_std(&[1.0, 3.0]);
        assert_eq!(mean, 2.0);
        assert_eq!(std, 1.0);
    }
}
