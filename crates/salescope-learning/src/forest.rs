//! Random forest regression over bootstrap-sampled variance-split trees.
//!
//! Trees are stored as flat node arenas so a fitted forest serializes to
//! plain JSON without any recursion in the data model. Split search uses
//! per-feature prefix sums over sorted samples, capped at a fixed number of
//! candidate positions per feature.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{LearningError, Result};
use crate::types::FeatureScore;

const DEFAULT_N_TREES: usize = 50;
const DEFAULT_MAX_DEPTH: usize = 6;
const DEFAULT_MIN_SAMPLES_LEAF: usize = 2;
const DEFAULT_SEED: u64 = 42;

/// Candidate split positions evaluated per feature at each node.
const MAX_SPLIT_CANDIDATES: usize = 32;

/// Training configuration for [`FittedForest`].
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    n_trees: usize,
    max_depth: usize,
    min_samples_leaf: usize,
    seed: u64,
}

impl Default for RandomForestRegressor {
    fn default() -> Self {
        Self {
            n_trees: DEFAULT_N_TREES,
            max_depth: DEFAULT_MAX_DEPTH,
            min_samples_leaf: DEFAULT_MIN_SAMPLES_LEAF,
            seed: DEFAULT_SEED,
        }
    }
}

impl RandomForestRegressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_trees(mut self, n_trees: usize) -> Self {
        self.n_trees = n_trees;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fits the forest on a row-major feature matrix and continuous targets.
    pub fn fit(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        feature_names: &[String],
    ) -> Result<FittedForest> {
        let n_rows = x.len();
        if n_rows == 0 {
            return Err(LearningError::InvalidData(
                "cannot fit a forest on an empty matrix".to_string(),
            ));
        }
        if y.len() != n_rows {
            return Err(LearningError::ShapeMismatch {
                expected: n_rows,
                actual: y.len(),
            });
        }
        let n_features = feature_names.len();
        for row in x {
            if row.len() != n_features {
                return Err(LearningError::ShapeMismatch {
                    expected: n_features,
                    actual: row.len(),
                });
            }
        }
        if self.n_trees == 0 {
            return Err(LearningError::TrainingFailed(
                "forest needs at least one tree".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut trees = Vec::with_capacity(self.n_trees);
        let mut gains = vec![0.0_f64; n_features];
        for _ in 0..self.n_trees {
            let sample: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
            let mut nodes = Vec::new();
            let root = grow(
                x,
                y,
                &sample,
                0,
                self.max_depth,
                self.min_samples_leaf,
                &mut nodes,
                &mut gains,
            );
            trees.push(Tree { nodes, root });
        }

        // Normalize accumulated impurity gains into importances.
        let total: f64 = gains.iter().sum();
        let importances = if total > 0.0 {
            gains.iter().map(|g| g / total).collect()
        } else {
            gains
        };

        Ok(FittedForest {
            feature_names: feature_names.to_vec(),
            trees,
            importances,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
    root: usize,
}

impl Tree {
    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut at = self.root;
        loop {
            match &self.nodes[at] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    at = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

fn mean_of(y: &[f64], indices: &[usize]) -> f64 {
    indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

fn find_best_split(
    x: &[Vec<f64>],
    y: &[f64],
    indices: &[usize],
    min_samples_leaf: usize,
) -> Option<BestSplit> {
    let n = indices.len();
    let n_features = x[indices[0]].len();

    let sum: f64 = indices.iter().map(|&i| y[i]).sum();
    let sum_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = sum_sq - sum * sum / n as f64;
    if parent_sse <= 1e-12 {
        return None;
    }

    let mut best: Option<BestSplit> = None;
    let mut sorted = indices.to_vec();
    for feature in 0..n_features {
        sorted.sort_by(|&a, &b| {
            x[a][feature]
                .partial_cmp(&x[b][feature])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Prefix sums let each candidate position score in O(1).
        let mut prefix = vec![0.0_f64; n + 1];
        let mut prefix_sq = vec![0.0_f64; n + 1];
        for (k, &i) in sorted.iter().enumerate() {
            prefix[k + 1] = prefix[k] + y[i];
            prefix_sq[k + 1] = prefix_sq[k] + y[i] * y[i];
        }

        let step = (n / MAX_SPLIT_CANDIDATES).max(1);
        let mut k = min_samples_leaf;
        while k + min_samples_leaf <= n {
            let lo = x[sorted[k - 1]][feature];
            let hi = x[sorted[k]][feature];
            if lo < hi {
                let left_sse = prefix_sq[k] - prefix[k] * prefix[k] / k as f64;
                let right_n = (n - k) as f64;
                let right_sum = sum - prefix[k];
                let right_sse = (sum_sq - prefix_sq[k]) - right_sum * right_sum / right_n;
                let gain = parent_sse - left_sse - right_sse;
                if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: (lo + hi) / 2.0,
                        gain,
                    });
                }
            }
            k += step;
        }
    }
    best
}

#[allow(clippy::too_many_arguments)]
fn grow(
    x: &[Vec<f64>],
    y: &[f64],
    indices: &[usize],
    depth: usize,
    max_depth: usize,
    min_samples_leaf: usize,
    nodes: &mut Vec<Node>,
    gains: &mut [f64],
) -> usize {
    let leaf = |nodes: &mut Vec<Node>| {
        nodes.push(Node::Leaf {
            value: mean_of(y, indices),
        });
        nodes.len() - 1
    };

    if depth >= max_depth || indices.len() < 2 * min_samples_leaf {
        return leaf(nodes);
    }
    let Some(split) = find_best_split(x, y, indices, min_samples_leaf) else {
        return leaf(nodes);
    };

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .partition(|&&i| x[i][split.feature] <= split.threshold);
    if left_idx.is_empty() || right_idx.is_empty() {
        return leaf(nodes);
    }
    gains[split.feature] += split.gain;

    let left = grow(
        x,
        y,
        &left_idx,
        depth + 1,
        max_depth,
        min_samples_leaf,
        nodes,
        gains,
    );
    let right = grow(
        x,
        y,
        &right_idx,
        depth + 1,
        max_depth,
        min_samples_leaf,
        nodes,
        gains,
    );
    nodes.push(Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        left,
        right,
    });
    nodes.len() - 1
}

/// A trained regression forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedForest {
    pub feature_names: Vec<String>,
    trees: Vec<Tree>,
    importances: Vec<f64>,
}

impl FittedForest {
    /// Mean prediction over all trees for each row.
    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        let n_features = self.feature_names.len();
        let mut out = Vec::with_capacity(x.len());
        for row in x {
            if row.len() != n_features {
                return Err(LearningError::ShapeMismatch {
                    expected: n_features,
                    actual: row.len(),
                });
            }
            let sum: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
            out.push(sum / self.trees.len() as f64);
        }
        Ok(out)
    }

    /// Normalized impurity-gain importances, sorted descending.
    pub fn feature_importances(&self) -> Vec<FeatureScore> {
        let mut scores: Vec<FeatureScore> = self
            .feature_names
            .iter()
            .zip(&self.importances)
            .map(|(name, imp)| FeatureScore {
                feature: name.clone(),
                score: *imp,
            })
            .collect();
        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scores
    }
}

static_assertions::assert_impl_all!(FittedForest: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{i}")).collect()
    }

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        // Target depends only on the first feature; the second is noise.
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            x.push(vec![i as f64, (i % 3) as f64]);
            y.push(if i < 20 { 10.0 } else { 50.0 });
        }
        (x, y)
    }

    #[test]
    fn test_fit_recovers_step_function() {
        let (x, y) = step_data();
        let model = RandomForestRegressor::new().fit(&x, &y, &names(2)).unwrap();
        let preds = model.predict(&x).unwrap();
        for (pred, truth) in preds.iter().zip(&y) {
            assert!(
                (pred - truth).abs() < 5.0,
                "prediction {pred} too far from {truth}"
            );
        }
    }

    #[test]
    fn test_constant_target_predicts_constant() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y = vec![7.5; 10];
        let model = RandomForestRegressor::new().fit(&x, &y, &names(1)).unwrap();
        let preds = model.predict(&[vec![3.0], vec![99.0]]).unwrap();
        assert!(preds.iter().all(|p| (p - 7.5).abs() < 1e-9));
    }

    #[test]
    fn test_informative_feature_dominates_importances() {
        let (x, y) = step_data();
        let model = RandomForestRegressor::new().fit(&x, &y, &names(2)).unwrap();
        let scores = model.feature_importances();
        assert_eq!(scores[0].feature, "f0");
        assert!(scores[0].score > 0.9);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let (x, y) = step_data();
        let a = RandomForestRegressor::new()
            .with_seed(7)
            .fit(&x, &y, &names(2))
            .unwrap();
        let b = RandomForestRegressor::new()
            .with_seed(7)
            .fit(&x, &y, &names(2))
            .unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_empty_matrix_rejected() {
        let err = RandomForestRegressor::new()
            .fit(&[], &[], &names(1))
            .unwrap_err();
        assert!(matches!(err, LearningError::InvalidData(_)));
    }

    #[test]
    fn test_predict_shape_mismatch_rejected() {
        let (x, y) = step_data();
        let model = RandomForestRegressor::new().fit(&x, &y, &names(2)).unwrap();
        let err = model.predict(&[vec![1.0]]).unwrap_err();
        assert!(matches!(err, LearningError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_fitted_forest_serializes() {
        let (x, y) = step_data();
        let model = RandomForestRegressor::new()
            .with_n_trees(5)
            .fit(&x, &y, &names(2))
            .unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: FittedForest = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.predict(&x).unwrap(), model.predict(&x).unwrap());
    }
}
