//! Stratified train/test splits and cross-validation folds.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SplitError {
    #[error("Test fraction must be between 0 and 1 (exclusive), got {0}")]
    InvalidFraction(f64),
    #[error("Class {label} has only {count} member(s); stratification needs at least 2")]
    ClassTooSmall { label: i64, count: usize },
    #[error("A {side} set of {size} rows cannot hold all {classes} classes")]
    TooFewRows {
        side: &'static str,
        size: usize,
        classes: usize,
    },
    #[error("Need at least 2 folds, got {0}")]
    TooFewFolds(usize),
    #[error("Cannot make {folds} folds from {rows} rows")]
    TooManyFolds { folds: usize, rows: usize },
}

/// Row indices of a train/test partition, both sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split rows into train and test sets that keep the class proportions.
///
/// The test set holds `ceil(test_fraction * n)` rows. Each class gets its
/// proportional share, rounded down, and the leftover rows go to the classes
/// with the largest remainders.
pub fn stratified_split(
    labels: &[i64],
    test_fraction: f64,
    seed: u64,
) -> Result<SplitIndices, SplitError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(SplitError::InvalidFraction(test_fraction));
    }
    let n = labels.len();
    let groups = group_by_class(labels);
    for (label, members) in &groups {
        if members.len() < 2 {
            return Err(SplitError::ClassTooSmall {
                label: *label,
                count: members.len(),
            });
        }
    }
    let n_test = (test_fraction * n as f64).ceil() as usize;
    let n_train = n - n_test.min(n);
    let classes = groups.len();
    if n_test < classes {
        return Err(SplitError::TooFewRows {
            side: "test",
            size: n_test,
            classes,
        });
    }
    if n_train < classes {
        return Err(SplitError::TooFewRows {
            side: "train",
            size: n_train,
            classes,
        });
    }

    let allocation = allocate(&groups, n_test, n);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n_test);
    for ((_, members), take) in groups.into_iter().zip(allocation) {
        let mut members = members;
        members.shuffle(&mut rng);
        test.extend_from_slice(&members[..take]);
        train.extend_from_slice(&members[take..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok(SplitIndices { train, test })
}

/// Shuffled stratified k-fold partition of `labels`.
///
/// Every row lands in exactly one test fold; each class is spread over the
/// folds round-robin so fold sizes differ by at most one.
pub fn stratified_kfold(
    labels: &[i64],
    folds: usize,
    seed: u64,
) -> Result<Vec<SplitIndices>, SplitError> {
    if folds < 2 {
        return Err(SplitError::TooFewFolds(folds));
    }
    if folds > labels.len() {
        return Err(SplitError::TooManyFolds {
            folds,
            rows: labels.len(),
        });
    }
    let groups = group_by_class(labels);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut assignment = vec![0usize; labels.len()];
    let mut offset = 0usize;
    for (label, mut members) in groups {
        if members.len() < folds {
            tracing::warn!(
                label,
                members = members.len(),
                folds,
                "Class has fewer members than folds"
            );
        }
        let count = members.len();
        members.shuffle(&mut rng);
        for (pos, row) in members.into_iter().enumerate() {
            assignment[row] = (offset + pos) % folds;
        }
        offset = (offset + count) % folds;
    }

    Ok((0..folds)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&row| assignment[row] == fold);
            SplitIndices { train, test }
        })
        .collect())
}

fn group_by_class(labels: &[i64]) -> BTreeMap<i64, Vec<usize>> {
    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (row, label) in labels.iter().enumerate() {
        groups.entry(*label).or_default().push(row);
    }
    groups
}

fn allocate(groups: &BTreeMap<i64, Vec<usize>>, n_test: usize, n: usize) -> Vec<usize> {
    let mut allocation = Vec::with_capacity(groups.len());
    let mut remainders = Vec::with_capacity(groups.len());
    for (idx, members) in groups.values().enumerate() {
        let exact = n_test as f64 * members.len() as f64 / n as f64;
        let base = (exact.floor() as usize).min(members.len() - 1);
        allocation.push(base);
        remainders.push((idx, exact - base as f64));
    }
    let mut left = n_test.saturating_sub(allocation.iter().sum());
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    while left > 0 {
        let mut progressed = false;
        for (idx, _) in &remainders {
            if left == 0 {
                break;
            }
            let capacity = groups.values().nth(*idx).map_or(0, |m| m.len() - 1);
            if allocation[*idx] < capacity {
                allocation[*idx] += 1;
                left -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    allocation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(negatives: usize, positives: usize) -> Vec<i64> {
        let mut labels = vec![0; negatives];
        labels.extend(vec![1; positives]);
        labels
    }

    #[test]
    fn quarter_of_hundred_is_twenty_five() {
        let labels = labels(60, 40);
        let split = stratified_split(&labels, 0.25, 7).unwrap();
        assert_eq!(split.test.len(), 25);
        assert_eq!(split.train.len(), 75);
        let positives = split.test.iter().filter(|&&i| labels[i] == 1).count();
        assert_eq!(positives, 10);
    }

    #[test]
    fn split_is_a_seeded_partition() {
        let labels = labels(13, 8);
        let a = stratified_split(&labels, 0.3, 1).unwrap();
        let b = stratified_split(&labels, 0.3, 1).unwrap();
        assert_eq!(a, b);
        let mut all: Vec<usize> = a.train.iter().chain(&a.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..21).collect::<Vec<_>>());
        // ceil(0.3 * 21) = 7, shares 13*7/21 = 4.33 and 8*7/21 = 2.67
        assert_eq!(a.test.len(), 7);
        assert_eq!(a.test.iter().filter(|&&i| labels[i] == 1).count(), 3);
    }

    #[test]
    fn rejects_unstratifiable_input() {
        assert!(matches!(
            stratified_split(&[0, 0, 0, 1], 0.25, 0),
            Err(SplitError::ClassTooSmall { label: 1, count: 1 })
        ));
        assert!(matches!(
            stratified_split(&labels(4, 4), 1.0, 0),
            Err(SplitError::InvalidFraction(_))
        ));
        assert!(matches!(
            stratified_split(&labels(10, 10), 0.04, 0),
            Err(SplitError::TooFewRows { side: "test", .. })
        ));
    }

    #[test]
    fn folds_cover_every_row_once_and_stay_balanced() {
        let labels = labels(23, 12);
        let folds = stratified_kfold(&labels, 5, 3).unwrap();
        assert_eq!(folds.len(), 5);
        let mut seen = vec![0usize; labels.len()];
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.test.len(), labels.len());
            assert!(fold.test.len() == 7);
            let positives = fold.test.iter().filter(|&&i| labels[i] == 1).count();
            assert!((2..=3).contains(&positives));
            for &row in &fold.test {
                seen[row] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn fold_count_is_validated() {
        assert!(matches!(
            stratified_kfold(&[0, 1], 1, 0),
            Err(SplitError::TooFewFolds(1))
        ));
        assert!(matches!(
            stratified_kfold(&[0, 1], 3, 0),
            Err(SplitError::TooManyFolds { folds: 3, rows: 2 })
        ));
    }
}
