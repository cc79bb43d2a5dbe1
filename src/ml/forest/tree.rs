use ndarray::ArrayView2;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Growth limits for a single CART tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLimits {
    /// Maximum depth; `None` grows until the other limits stop it.
    pub max_depth: Option<usize>,
    /// Features inspected per split (at least one valid split is always searched for).
    pub max_features: usize,
    /// Smallest node that may be split.
    pub min_samples_split: usize,
    /// Smallest allowed child.
    pub min_samples_leaf: usize,
}

/// Tree node stored in a flat arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Class distribution of the training samples that reached the leaf.
    Leaf { distribution: Vec<f64> },
    /// `value <= threshold` goes left; larger values and NaN go right.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Classification tree grown with Gini impurity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    /// Normalized impurity decrease per feature.
    importances: Vec<f64>,
}

impl DecisionTree {
    /// Grow a tree on the rows listed in `samples` (duplicates allowed, as in a bootstrap).
    ///
    /// `targets[i]` is the class index of row `i`.
    pub fn fit<R: Rng>(
        features: ArrayView2<'_, f64>,
        targets: &[usize],
        n_classes: usize,
        samples: Vec<usize>,
        limits: TreeLimits,
        rng: &mut R,
    ) -> Self {
        let n_features = features.ncols();
        let mut builder = Builder {
            features: features.view(),
            targets,
            n_classes,
            limits,
            total: samples.len().max(1) as f64,
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
            feature_order: (0..n_features).collect(),
        };
        let mut samples = samples;
        builder.grow(&mut samples, 0, rng);

        let mut importances = builder.importances;
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for value in &mut importances {
                *value /= total;
            }
        }
        Self {
            nodes: builder.nodes,
            importances,
        }
    }

    /// Class distribution for one feature row.
    pub fn predict_distribution(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(f64::NAN);
                    idx = if value <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Check that child links point inside the arena and leaves have `n_classes` entries.
    pub fn validate(&self, n_classes: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("Tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { distribution } if distribution.len() != n_classes => {
                    return Err(format!(
                        "Leaf {idx} has {} classes but expected {n_classes}",
                        distribution.len()
                    ));
                }
                Node::Split { left, right, .. }
                    if *left >= self.nodes.len() || *right >= self.nodes.len() =>
                {
                    return Err(format!("Split {idx} points outside the tree"));
                }
                Node::Split { left, right, .. } if *left <= idx || *right <= idx => {
                    return Err(format!("Split {idx} points backwards"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

struct Builder<'a> {
    features: ArrayView2<'a, f64>,
    targets: &'a [usize],
    n_classes: usize,
    limits: TreeLimits,
    total: f64,
    nodes: Vec<Node>,
    importances: Vec<f64>,
    feature_order: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    /// Weighted child impurity `(n_l * gini_l + n_r * gini_r) / n`.
    score: f64,
}

impl Builder<'_> {
    fn grow<R: Rng>(&mut self, samples: &mut [usize], depth: usize, rng: &mut R) -> usize {
        let counts = self.class_counts(samples);
        let n = samples.len();
        let impurity = gini(&counts, n);
        let node_idx = self.nodes.len();

        let depth_reached = self.limits.max_depth.is_some_and(|max| depth >= max);
        let too_small = n < self.limits.min_samples_split.max(2)
            || n < 2 * self.limits.min_samples_leaf.max(1);
        let split = if depth_reached || too_small || impurity <= f64::EPSILON {
            None
        } else {
            self.best_split(samples, rng)
        };

        let Some(split) = split else {
            self.nodes.push(Node::Leaf {
                distribution: distribution(&counts, n),
            });
            return node_idx;
        };

        self.importances[split.feature] += (n as f64 / self.total) * (impurity - split.score);
        self.nodes.push(Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: 0,
            right: 0,
        });

        let boundary = partition(samples, |&row| {
            self.features[(row, split.feature)] <= split.threshold
        });
        let (left_samples, right_samples) = samples.split_at_mut(boundary);
        let left = self.grow(left_samples, depth + 1, rng);
        let right = self.grow(right_samples, depth + 1, rng);
        if let Node::Split {
            left: l, right: r, ..
        } = &mut self.nodes[node_idx]
        {
            *l = left;
            *r = right;
        }
        node_idx
    }

    fn best_split<R: Rng>(&mut self, samples: &[usize], rng: &mut R) -> Option<SplitCandidate> {
        self.feature_order.shuffle(rng);
        let order = self.feature_order.clone();
        let mut best: Option<SplitCandidate> = None;
        let mut visited = 0usize;
        let mut column: Vec<(f64, usize)> = Vec::with_capacity(samples.len());

        for feature in order {
            if visited >= self.limits.max_features.max(1) && best.is_some() {
                break;
            }
            column.clear();
            column.extend(
                samples
                    .iter()
                    .map(|&row| (self.features[(row, feature)], self.targets[row])),
            );
            column.sort_by(|a, b| a.0.total_cmp(&b.0));
            let first = column[0].0;
            let last = column[column.len() - 1].0;
            if first.is_nan() || first.total_cmp(&last).is_eq() {
                // constant (or all-missing) feature
                continue;
            }
            visited += 1;
            if let Some(candidate) = self.scan_feature(feature, &column) {
                if best.is_none_or(|current| candidate.score < current.score) {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    fn scan_feature(&self, feature: usize, column: &[(f64, usize)]) -> Option<SplitCandidate> {
        let n = column.len();
        let min_leaf = self.limits.min_samples_leaf.max(1);
        let mut right = vec![0usize; self.n_classes];
        for &(_, class) in column {
            right[class] += 1;
        }
        let mut left = vec![0usize; self.n_classes];
        let mut best: Option<SplitCandidate> = None;

        for i in 1..n {
            let (prev, class) = column[i - 1];
            left[class] += 1;
            right[class] -= 1;
            if prev.is_nan() {
                break;
            }
            let next = column[i].0;
            if !next.is_nan() && next <= prev {
                continue;
            }
            if i < min_leaf || n - i < min_leaf {
                continue;
            }
            let score = (i as f64 * gini(&left, i) + (n - i) as f64 * gini(&right, n - i))
                / n as f64;
            if best.is_none_or(|current| score < current.score) {
                let threshold = if next.is_nan() {
                    prev
                } else {
                    let mid = prev + (next - prev) / 2.0;
                    if mid >= next { prev } else { mid }
                };
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    score,
                });
            }
        }
        best
    }

    fn class_counts(&self, samples: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes];
        for &row in samples {
            counts[self.targets[row]] += 1;
        }
        counts
    }
}

fn gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / n;
            p * p
        })
        .sum::<f64>()
}

fn distribution(counts: &[usize], n: usize) -> Vec<f64> {
    let n = n.max(1) as f64;
    counts.iter().map(|&c| c as f64 / n).collect()
}

/// Move elements satisfying `pred` to the front; returns how many did.
fn partition<T, F: Fn(&T) -> bool>(items: &mut [T], pred: F) -> usize {
    let mut boundary = 0;
    for i in 0..items.len() {
        if pred(&items[i]) {
            items.swap(i, boundary);
            boundary += 1;
        }
    }
    boundary
}
