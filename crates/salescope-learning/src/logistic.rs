//! Logistic regression trained with batch gradient descent.
//!
//! Features are standardized internally and class weights are balanced, so
//! heavily skewed targets still produce a usable decision boundary. The
//! fitted model captures the scaling parameters and applies them again at
//! prediction time.

use serde::{Deserialize, Serialize};

use crate::error::{LearningError, Result};
use crate::types::FeatureScore;

const DEFAULT_LEARNING_RATE: f64 = 0.1;
const DEFAULT_N_ITERS: usize = 500;

/// Training configuration for [`FittedLogistic`].
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    learning_rate: f64,
    n_iters: usize,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            n_iters: DEFAULT_N_ITERS,
        }
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_n_iters(mut self, n_iters: usize) -> Self {
        self.n_iters = n_iters;
        self
    }

    /// Fits the model on a row-major feature matrix and 0/1 labels.
    pub fn fit(
        &self,
        x: &[Vec<f64>],
        y: &[i64],
        feature_names: &[String],
    ) -> Result<FittedLogistic> {
        let n_rows = x.len();
        if n_rows == 0 {
            return Err(LearningError::InvalidData(
                "cannot fit logistic regression on an empty matrix".to_string(),
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

        let n_pos = y.iter().filter(|&&v| v == 1).count();
        let n_neg = n_rows - n_pos;
        if n_pos == 0 || n_neg == 0 {
            return Err(LearningError::TrainingFailed(
                "labels contain a single class".to_string(),
            ));
        }

        // Standardize per feature; constant columns keep std 1.0 so they
        // contribute a zero-centered value instead of NaN.
        let mut means = vec![0.0_f64; n_features];
        let mut stds = vec![0.0_f64; n_features];
        for j in 0..n_features {
            let mean = x.iter().map(|row| row[j]).sum::<f64>() / n_rows as f64;
            let var = x
                .iter()
                .map(|row| (row[j] - mean) * (row[j] - mean))
                .sum::<f64>()
                / n_rows as f64;
            means[j] = mean;
            stds[j] = if var > 0.0 { var.sqrt() } else { 1.0 };
        }
        let scaled: Vec<Vec<f64>> = x
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(j, v)| (v - means[j]) / stds[j])
                    .collect()
            })
            .collect();

        // Balanced class weights: n / (2 * class count).
        let w_pos = n_rows as f64 / (2.0 * n_pos as f64);
        let w_neg = n_rows as f64 / (2.0 * n_neg as f64);
        let sample_weights: Vec<f64> = y
            .iter()
            .map(|&v| if v == 1 { w_pos } else { w_neg })
            .collect();
        let weight_sum: f64 = sample_weights.iter().sum();

        let mut weights = vec![0.0_f64; n_features];
        let mut intercept = 0.0_f64;
        for _ in 0..self.n_iters {
            let mut grad_w = vec![0.0_f64; n_features];
            let mut grad_b = 0.0_f64;
            for (i, row) in scaled.iter().enumerate() {
                let z = intercept
                    + row
                        .iter()
                        .zip(&weights)
                        .map(|(v, w)| v * w)
                        .sum::<f64>();
                let p = sigmoid(z);
                let err = sample_weights[i] * (p - y[i] as f64);
                for (j, v) in row.iter().enumerate() {
                    grad_w[j] += err * v;
                }
                grad_b += err;
            }
            for j in 0..n_features {
                weights[j] -= self.learning_rate * grad_w[j] / weight_sum;
            }
            intercept -= self.learning_rate * grad_b / weight_sum;
        }

        if weights.iter().any(|w| !w.is_finite()) || !intercept.is_finite() {
            return Err(LearningError::TrainingFailed(
                "gradient descent diverged".to_string(),
            ));
        }

        Ok(FittedLogistic {
            feature_names: feature_names.to_vec(),
            means,
            stds,
            weights,
            intercept,
        })
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// A trained logistic regression model, including its scaling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedLogistic {
    pub feature_names: Vec<String>,
    means: Vec<f64>,
    stds: Vec<f64>,
    weights: Vec<f64>,
    intercept: f64,
}

impl FittedLogistic {
    /// Positive-class probability for each row.
    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        let n_features = self.feature_names.len();
        let mut out = Vec::with_capacity(x.len());
        for row in x {
            if row.len() != n_features {
                return Err(LearningError::ShapeMismatch {
                    expected: n_features,
                    actual: row.len(),
                });
            }
            let z = self.intercept
                + row
                    .iter()
                    .enumerate()
                    .map(|(j, v)| (v - self.means[j]) / self.stds[j] * self.weights[j])
                    .sum::<f64>();
            out.push(sigmoid(z));
        }
        Ok(out)
    }

    /// Hard 0/1 labels at a 0.5 threshold.
    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<i64>> {
        Ok(self
            .predict_proba(x)?
            .into_iter()
            .map(|p| i64::from(p >= 0.5))
            .collect())
    }

    /// Signed standardized coefficients, sorted by magnitude descending.
    pub fn coefficients(&self) -> Vec<FeatureScore> {
        let mut scores: Vec<FeatureScore> = self
            .feature_names
            .iter()
            .zip(&self.weights)
            .map(|(name, w)| FeatureScore {
                feature: name.clone(),
                score: *w,
            })
            .collect();
        scores.sort_by(|a, b| {
            b.score
                .abs()
                .partial_cmp(&a.score.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scores
    }
}

static_assertions::assert_impl_all!(FittedLogistic: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{i}")).collect()
    }

    fn separable_data() -> (Vec<Vec<f64>>, Vec<i64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..20 {
            x.push(vec![i as f64, 5.0]);
            y.push(i64::from(i >= 10));
        }
        (x, y)
    }

    #[test]
    fn test_fit_separable_data() {
        let (x, y) = separable_data();
        let model = LogisticRegression::new().fit(&x, &y, &names(2)).unwrap();
        let preds = model.predict(&x).unwrap();
        let hits = preds.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(hits >= 18, "expected near-perfect fit, got {hits}/20");
    }

    #[test]
    fn test_proba_increases_with_feature() {
        let (x, y) = separable_data();
        let model = LogisticRegression::new().fit(&x, &y, &names(2)).unwrap();
        let probs = model
            .predict_proba(&[vec![0.0, 5.0], vec![19.0, 5.0]])
            .unwrap();
        assert!(probs[0] < 0.5);
        assert!(probs[1] > 0.5);
    }

    #[test]
    fn test_balanced_weights_on_skewed_labels() {
        // 18 negatives, 2 positives, still separable on the first feature.
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..18 {
            x.push(vec![i as f64 * 0.1]);
            y.push(0);
        }
        x.push(vec![10.0]);
        x.push(vec![11.0]);
        y.push(1);
        y.push(1);
        let model = LogisticRegression::new().fit(&x, &y, &names(1)).unwrap();
        let preds = model.predict(&x).unwrap();
        assert_eq!(&preds[18..], &[1, 1]);
    }

    #[test]
    fn test_constant_column_does_not_produce_nan() {
        let (x, y) = separable_data();
        let model = LogisticRegression::new().fit(&x, &y, &names(2)).unwrap();
        let probs = model.predict_proba(&x).unwrap();
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_single_class_rejected() {
        let x = vec![vec![1.0], vec![2.0]];
        let err = LogisticRegression::new()
            .fit(&x, &[1, 1], &names(1))
            .unwrap_err();
        assert!(matches!(err, LearningError::TrainingFailed(_)));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let x = vec![vec![1.0, 2.0], vec![3.0]];
        let err = LogisticRegression::new()
            .fit(&x, &[0, 1], &names(2))
            .unwrap_err();
        assert!(matches!(err, LearningError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_coefficients_sorted_by_magnitude() {
        let (x, y) = separable_data();
        let model = LogisticRegression::new().fit(&x, &y, &names(2)).unwrap();
        let coefs = model.coefficients();
        assert_eq!(coefs.len(), 2);
        assert!(coefs[0].score.abs() >= coefs[1].score.abs());
        // The informative feature dominates the constant one.
        assert_eq!(coefs[0].feature, "f0");
    }

    #[test]
    fn test_fitted_model_serializes() {
        let (x, y) = separable_data();
        let model = LogisticRegression::new().fit(&x, &y, &names(2)).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: FittedLogistic = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.feature_names, model.feature_names);
        assert_eq!(
            restored.predict_proba(&x).unwrap(),
            model.predict_proba(&x).unwrap()
        );
    }
}
