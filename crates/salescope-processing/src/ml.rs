//! Model training stage.
//!
//! Runs two fixed tasks over the engineered feature table: a logistic
//! classifier for high-value orders and a random-forest regressor for the
//! order amount. The tasks are isolated from each other: an estimator
//! failure is logged and leaves that task's metrics empty, the other task
//! and the rest of the run continue.

use std::fs;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use salescope_learning::{
    FeatureScore, LogisticRegression, Metrics, RandomForestRegressor, metrics, stratified_split,
    train_test_split,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{ClassificationConfig, MlConfig};
use crate::error::{PipelineError, Result};
use crate::features::{build_features, classification_target, select_numeric_features};
use crate::types::MlReport;

const TEST_FRACTION: f64 = 0.25;
const SEED: u64 = 42;
const LOGISTIC_ITERS: usize = 1000;
const FOREST_TREES: usize = 250;
/// Rows kept in the coefficient and importance tables.
const TOP_FEATURES: usize = 20;

const CLASSIFIER_MODEL_FILE: &str = "logreg_high_value.json";
const REGRESSOR_MODEL_FILE: &str = "rf_amount.json";

/// Everything the training stage hands to reporting and the run summary.
#[derive(Debug, Default)]
pub struct MlOutcome {
    pub report: MlReport,
    /// Classifier coefficients, strongest first, capped at [`TOP_FEATURES`].
    pub coefficients: Vec<FeatureScore>,
    /// Regressor importances, strongest first, capped at [`TOP_FEATURES`].
    pub importances: Vec<FeatureScore>,
    /// Saved model files.
    pub model_paths: Vec<PathBuf>,
}

/// One finished training task.
struct TrainedTask {
    metrics: Metrics,
    scores: Vec<FeatureScore>,
    model_path: Option<PathBuf>,
}

/// Train the configured models on the cleaned sales table.
///
/// Skips entirely when `ml.enabled` is false or the table is empty, with
/// the reason recorded in the report.
pub fn run_ml(cleaned: &DataFrame, config: &MlConfig) -> Result<MlOutcome> {
    let mut outcome = MlOutcome::default();
    if !config.enabled {
        info!("ML stage disabled, skipping");
        outcome.report.skipped_reason = Some("disabled in config".to_string());
        return Ok(outcome);
    }
    if cleaned.height() == 0 {
        warn!("No rows to train on, ML stage skipped");
        outcome.report.skipped_reason = Some("no rows to train on".to_string());
        return Ok(outcome);
    }

    let features = build_features(cleaned)?;
    debug!(
        "Feature table built: {} rows x {} columns",
        features.height(),
        features.width()
    );

    if config.classification.enabled {
        match train_classifier(&features, &config.classification, &config.models_dir) {
            Ok((target, task)) => {
                info!("Classification done, target '{}': {:?}", target, task.metrics);
                outcome.report.target_column = Some(target);
                outcome.report.classification = Some(task.metrics);
                outcome.coefficients = task.scores;
                outcome.model_paths.extend(task.model_path);
            }
            Err(e) => error!("Classification task failed: {}", e),
        }
    } else {
        info!("Classification task disabled");
    }

    if config.regression.enabled {
        if features.column("amount").is_ok() {
            match train_regressor(&features, &config.models_dir) {
                Ok(task) => {
                    info!("Regression done: {:?}", task.metrics);
                    outcome.report.regression = Some(task.metrics);
                    outcome.importances = task.scores;
                    outcome.model_paths.extend(task.model_path);
                }
                Err(e) => error!("Regression task failed: {}", e),
            }
        } else {
            info!("No amount column, regression task skipped");
        }
    } else {
        info!("Regression task disabled");
    }

    Ok(outcome)
}

/// Classification task: derive the binary target, train the logistic model
/// on a stratified 75/25 split and score the held-out set at cutoff 0.5.
fn train_classifier(
    features: &DataFrame,
    config: &ClassificationConfig,
    models_dir: &Path,
) -> Result<(String, TrainedTask)> {
    let (labels, target) =
        classification_target(features, config.target.as_deref(), config.threshold_q)?;
    let (feat, names) = select_numeric_features(features, &[target.as_str(), "amount"])?;
    if names.is_empty() {
        return Err(PipelineError::FeatureEngineeringFailed(
            "no numeric feature columns to train on".to_string(),
        ));
    }

    let rows = to_rows(&feat)?;
    let (train_idx, test_idx) = stratified_split(&labels, TEST_FRACTION, SEED)?;
    let x_train = gather_rows(&rows, &train_idx);
    let x_test = gather_rows(&rows, &test_idx);
    let y_train = gather(&labels, &train_idx);
    let y_test = gather(&labels, &test_idx);

    let model = LogisticRegression::new()
        .with_n_iters(LOGISTIC_ITERS)
        .fit(&x_train, &y_train, &names)?;
    let proba = model.predict_proba(&x_test)?;
    let pred: Vec<i64> = proba.iter().map(|p| i64::from(*p >= 0.5)).collect();

    let mut m = Metrics::default();
    m.accuracy = Some(metrics::accuracy(&y_test, &pred));
    m.precision = Some(metrics::precision(&y_test, &pred));
    m.recall = Some(metrics::recall(&y_test, &pred));
    m.f1 = Some(metrics::f1(&y_test, &pred));
    m.roc_auc = Some(metrics::roc_auc(&y_test, &proba));
    m.n_train = Some(x_train.len());
    m.n_test = Some(x_test.len());

    let model_path = save_model(&model, models_dir, CLASSIFIER_MODEL_FILE);
    let task = TrainedTask {
        metrics: m,
        scores: model.coefficients().into_iter().take(TOP_FEATURES).collect(),
        model_path,
    };
    Ok((target, task))
}

/// Regression task: predict `amount` with the forest on a 75/25 split,
/// leaving rows with a missing target out entirely.
fn train_regressor(features: &DataFrame, models_dir: &Path) -> Result<TrainedTask> {
    let amount = features.column("amount")?.cast(&DataType::Float64)?;
    let targets: Vec<Option<f64>> = amount.f64()?.into_iter().collect();
    let (feat, names) = select_numeric_features(features, &["amount"])?;
    if names.is_empty() {
        return Err(PipelineError::FeatureEngineeringFailed(
            "no numeric feature columns to train on".to_string(),
        ));
    }

    let rows = to_rows(&feat)?;
    let mut x: Vec<Vec<f64>> = Vec::with_capacity(rows.len());
    let mut y: Vec<f64> = Vec::with_capacity(rows.len());
    for (row, target) in rows.into_iter().zip(&targets) {
        if let Some(v) = target {
            if !v.is_nan() {
                x.push(row);
                y.push(*v);
            }
        }
    }
    if x.is_empty() {
        return Err(PipelineError::FeatureEngineeringFailed(
            "all `amount` values are missing, nothing to regress on".to_string(),
        ));
    }

    let (train_idx, test_idx) = train_test_split(x.len(), TEST_FRACTION, SEED)?;
    let x_train = gather_rows(&x, &train_idx);
    let x_test = gather_rows(&x, &test_idx);
    let y_train = gather(&y, &train_idx);
    let y_test = gather(&y, &test_idx);

    let model = RandomForestRegressor::new()
        .with_n_trees(FOREST_TREES)
        .with_seed(SEED)
        .fit(&x_train, &y_train, &names)?;
    let pred = model.predict(&x_test)?;

    let mut m = Metrics::default();
    m.rmse = Some(metrics::rmse(&y_test, &pred));
    m.mae = Some(metrics::mae(&y_test, &pred));
    m.r2 = Some(metrics::r2(&y_test, &pred));
    m.n_train = Some(x_train.len());
    m.n_test = Some(x_test.len());

    let model_path = save_model(&model, models_dir, REGRESSOR_MODEL_FILE);
    Ok(TrainedTask {
        metrics: m,
        scores: model
            .feature_importances()
            .into_iter()
            .take(TOP_FEATURES)
            .collect(),
        model_path,
    })
}

/// Row-major copy of an all-`Float64` feature frame.
fn to_rows(df: &DataFrame) -> Result<Vec<Vec<f64>>> {
    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(df.width());
    for col in df.get_columns() {
        columns.push(col.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect());
    }
    let mut rows = vec![Vec::with_capacity(columns.len()); df.height()];
    for values in &columns {
        for (row, v) in rows.iter_mut().zip(values) {
            row.push(*v);
        }
    }
    Ok(rows)
}

fn gather_rows(rows: &[Vec<f64>], idx: &[usize]) -> Vec<Vec<f64>> {
    idx.iter().map(|&i| rows[i].clone()).collect()
}

fn gather<T: Copy>(values: &[T], idx: &[usize]) -> Vec<T> {
    idx.iter().map(|&i| values[i]).collect()
}

/// Write a fitted model as pretty JSON. A failure here costs the file, not
/// the metrics, so it only warns.
fn save_model<T: Serialize>(model: &T, dir: &Path, file_name: &str) -> Option<PathBuf> {
    let path = dir.join(file_name);
    let result = (|| -> Result<()> {
        fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(model)?;
        fs::write(&path, json)?;
        Ok(())
    })();
    match result {
        Ok(()) => {
            info!("Model saved: {}", path.display());
            Some(path)
        }
        Err(e) => {
            warn!("Failed to save model {}: {}", path.display(), e);
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Forty orders over eight customers with a steady amount ramp, so the
    /// 0.8 quantile target has both classes and the regressor has signal.
    fn sales_fixture() -> DataFrame {
        let n = 40usize;
        let customer_id: Vec<i64> = (0..n).map(|i| (i % 8) as i64 + 1).collect();
        let amount: Vec<f64> = (0..n).map(|i| (i + 1) as f64).collect();
        let source: Vec<&str> = (0..n).map(|i| if i % 2 == 0 { "db" } else { "api" }).collect();
        df![
            "customer_id" => customer_id,
            "amount" => amount,
            "source" => source,
        ]
        .unwrap()
    }

    #[test]
    fn test_run_ml_trains_both_tasks() {
        let dir = tempdir().unwrap();
        let mut config = MlConfig::default();
        config.models_dir = dir.path().join("models");

        let outcome = run_ml(&sales_fixture(), &config).unwrap();
        let report = &outcome.report;
        assert!(report.skipped_reason.is_none());
        assert_eq!(report.target_column.as_deref(), Some("high_value_q0.80"));

        let clf = report.classification.as_ref().unwrap();
        assert_eq!(clf.n_train.unwrap() + clf.n_test.unwrap(), 40);
        assert!(clf.accuracy.unwrap() >= 0.0 && clf.accuracy.unwrap() <= 1.0);
        assert!(clf.roc_auc.is_some());

        let reg = report.regression.as_ref().unwrap();
        assert_eq!(reg.n_train.unwrap() + reg.n_test.unwrap(), 40);
        assert!(reg.rmse.unwrap() >= 0.0);

        assert!(!outcome.coefficients.is_empty());
        assert!(!outcome.importances.is_empty());
        assert_eq!(outcome.model_paths.len(), 2);
        for path in &outcome.model_paths {
            assert!(path.exists());
        }
    }

    #[test]
    fn test_run_ml_disabled() {
        let config = MlConfig {
            enabled: false,
            ..MlConfig::default()
        };
        let outcome = run_ml(&sales_fixture(), &config).unwrap();
        assert_eq!(
            outcome.report.skipped_reason.as_deref(),
            Some("disabled in config")
        );
        assert!(outcome.report.classification.is_none());
        assert!(outcome.model_paths.is_empty());
    }

    #[test]
    fn test_run_ml_empty_table() {
        let config = MlConfig::default();
        let outcome = run_ml(&DataFrame::empty(), &config).unwrap();
        assert_eq!(
            outcome.report.skipped_reason.as_deref(),
            Some("no rows to train on")
        );
    }

    #[test]
    fn test_classification_failure_leaves_regression_alone() {
        // Constant amounts give a single-class target: the classifier
        // cannot train, the regressor still can.
        let dir = tempdir().unwrap();
        let n = 20usize;
        let df = df![
            "customer_id" => (0..n).map(|i| (i % 4) as i64).collect::<Vec<_>>(),
            "amount" => vec![50.0; n],
        ]
        .unwrap();
        let mut config = MlConfig::default();
        config.models_dir = dir.path().join("models");

        let outcome = run_ml(&df, &config).unwrap();
        assert!(outcome.report.classification.is_none());
        assert!(outcome.coefficients.is_empty());
        assert!(outcome.report.regression.is_some());
        assert_eq!(outcome.model_paths.len(), 1);
    }

    #[test]
    fn test_regression_masks_null_amounts() {
        let dir = tempdir().unwrap();
        let n = 30usize;
        let amount: Vec<Option<f64>> = (0..n)
            .map(|i| if i % 3 == 0 { None } else { Some(i as f64) })
            .collect();
        let df = df![
            "customer_id" => (0..n).map(|i| (i % 5) as i64).collect::<Vec<_>>(),
            "amount" => amount,
        ]
        .unwrap();
        let mut config = MlConfig::default();
        config.classification.enabled = false;
        config.models_dir = dir.path().join("models");

        let outcome = run_ml(&df, &config).unwrap();
        let reg = outcome.report.regression.as_ref().unwrap();
        // 10 of 30 rows carry no target.
        assert_eq!(reg.n_train.unwrap() + reg.n_test.unwrap(), 20);
    }

    #[test]
    fn test_top_feature_tables_are_sorted() {
        let dir = tempdir().unwrap();
        let mut config = MlConfig::default();
        config.models_dir = dir.path().join("models");

        let outcome = run_ml(&sales_fixture(), &config).unwrap();
        let coefs = &outcome.coefficients;
        for pair in coefs.windows(2) {
            assert!(pair[0].score.abs() >= pair[1].score.abs());
        }
        let imps = &outcome.importances;
        for pair in imps.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
