//! salescope-learning: Native model training for tabular sales data.
//!
//! This crate provides the model-fitting half of the salescope pipeline:
//! deterministic train/test splitting, a logistic regression classifier, a
//! random forest regressor, and the evaluation metrics both are scored with.
//! Everything runs in-process on plain `Vec<f64>` matrices with no external
//! runtime.
//!
//! # Features
//!
//! - **Deterministic splits**: Seeded shuffling, with optional stratification
//!   for classification targets
//! - **Logistic regression**: Gradient descent on standardized features with
//!   balanced class weights
//! - **Random forest**: Bootstrap-sampled variance-split regression trees
//!   with impurity-gain feature importances
//! - **Metrics**: Accuracy, precision, recall, F1, ROC AUC, RMSE, MAE, R²
//! - **Serializable models**: Fitted models round-trip through JSON
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use salescope_learning::{train_test_split, LogisticRegression, metrics};
//!
//! let (train_idx, test_idx) = train_test_split(x.len(), 0.25, 42)?;
//! let model = LogisticRegression::new().fit(&x_train, &y_train, &feature_names)?;
//! let preds = model.predict(&x_test)?;
//! let score = metrics::f1(&y_test, &preds);
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, LearningError>`]:
//!
//! - [`LearningError::InvalidData`] - empty or unusable training input
//! - [`LearningError::ShapeMismatch`] - row or column counts disagree
//! - [`LearningError::TrainingFailed`] - fitting could not produce a model
//!
//! [`Result<T, LearningError>`]: crate::Result

mod error;
mod forest;
mod logistic;
pub mod metrics;
mod split;
mod types;

// Re-export public API
//
// Error types
pub use error::{LearningError, Result};
// Estimators
pub use forest::{FittedForest, RandomForestRegressor};
pub use logistic::{FittedLogistic, LogisticRegression};
// Splitting
pub use split::{stratified_split, train_test_split};
// Result types
pub use types::{FeatureScore, Metrics};
