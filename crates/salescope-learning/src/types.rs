//! Common types returned by the estimators.
//!
//! - [`Metrics`]: evaluation metrics (classification or regression)
//! - [`FeatureScore`]: a named per-feature weight or importance

use serde::{Deserialize, Serialize};

/// Metrics from model evaluation.
///
/// Contains optional fields for both classification and regression metrics;
/// only the fields relevant to the evaluated task are populated.
///
/// # Classification
///
/// `accuracy`, `precision`, `recall`, `f1` and `roc_auc` are populated, all
/// in `[0.0, 1.0]`. Precision/recall/F1 treat label `1` as the positive
/// class and degrade to `0.0` instead of dividing by zero.
///
/// # Regression
///
/// `rmse` and `mae` are in target units (lower is better); `r2` is the
/// coefficient of determination with 1.0 a perfect fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Metrics {
    /// Fraction of correct predictions (classification only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,

    /// Positive-class precision (classification only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,

    /// Positive-class recall (classification only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recall: Option<f64>,

    /// Positive-class F1 score (classification only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f1: Option<f64>,

    /// Area under the ROC curve (binary classification only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roc_auc: Option<f64>,

    /// Root mean squared error (regression only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rmse: Option<f64>,

    /// Mean absolute error (regression only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mae: Option<f64>,

    /// Coefficient of determination (regression only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r2: Option<f64>,

    /// Number of training rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_train: Option<usize>,

    /// Number of held-out test rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_test: Option<usize>,
}

/// A named per-feature score: a signed logistic coefficient or a forest
/// importance, depending on the producing model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScore {
    /// Feature (column) name.
    pub feature: String,
    /// The score; semantics depend on the producing model.
    pub score: f64,
}
