//! Report tables for a pipeline run.
//!
//! Builds the per-source aggregates, the overall run metrics and a numeric
//! summary of the cleaned table, then writes them together with the model
//! coefficient/importance tables as CSV files under the configured output
//! directory. Every write is best-effort: a failed table is logged and the
//! rest still land.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use salescope_learning::FeatureScore;
use tracing::{debug, info, warn};

use crate::aggregate::PROVENANCE_COLUMN;
use crate::cleaning::count_duplicates;
use crate::config::ReportingConfig;
use crate::error::Result;
use crate::features::ID_COLUMNS;
use crate::ml::MlOutcome;
use crate::types::Artifacts;
use crate::utils::{is_numeric_dtype, quantile_linear};

/// Build and write all report tables, returning the produced artifacts.
///
/// `raw` is the merged table before cleaning, `cleaned` the one after; the
/// two differ in the duplicate and missing counts reported side by side.
pub fn run_reporting(
    raw: &DataFrame,
    cleaned: &DataFrame,
    ml: &MlOutcome,
    config: &ReportingConfig,
) -> Artifacts {
    let mut artifacts = Artifacts::default();
    let output_dir = config.output_dir.as_path();

    let tables: Vec<(&str, Result<DataFrame>)> = vec![
        ("aggregates_by_source.csv", aggregates_by_source(cleaned)),
        ("overall_metrics.csv", overall_metrics(raw, cleaned)),
        ("basic_stats.csv", basic_stats(cleaned)),
    ];
    for (file_name, table) in tables {
        match table {
            Ok(mut df) => {
                if file_name == "aggregates_by_source.csv" && df.height() > 0 {
                    info!("Per-source aggregates:\n{}", df);
                }
                if let Some(path) = write_csv(&mut df, output_dir, file_name) {
                    artifacts.tables.push(path);
                }
            }
            Err(e) => warn!("Failed to build report table {}: {}", file_name, e),
        }
    }

    if !ml.coefficients.is_empty() {
        match coefficient_frame(&ml.coefficients) {
            Ok(mut df) => {
                if let Some(path) = write_csv(&mut df, output_dir, "logreg_coeffs.csv") {
                    artifacts.tables.push(path);
                }
            }
            Err(e) => warn!("Failed to build coefficient table: {}", e),
        }
    }
    if !ml.importances.is_empty() {
        match importance_frame(&ml.importances) {
            Ok(mut df) => {
                if let Some(path) = write_csv(&mut df, output_dir, "rf_importance.csv") {
                    artifacts.tables.push(path);
                }
            }
            Err(e) => warn!("Failed to build importance table: {}", e),
        }
    }

    artifacts.models = ml.model_paths.clone();
    info!(
        "Wrote {} report tables to {}",
        artifacts.tables.len(),
        output_dir.display()
    );
    artifacts
}

/// Per-source row counts and amount totals over the cleaned table.
///
/// Rows with a null source label belong to no group. Returns an empty frame
/// with the same columns when the table has no provenance column or no rows.
pub fn aggregates_by_source(cleaned: &DataFrame) -> Result<DataFrame> {
    if cleaned.column(PROVENANCE_COLUMN).is_err() || cleaned.height() == 0 {
        return Ok(df![
            PROVENANCE_COLUMN => Vec::<String>::new(),
            "rows" => Vec::<i64>::new(),
            "amount_sum" => Vec::<f64>::new(),
            "amount_mean" => Vec::<f64>::new(),
        ]?);
    }

    let has_amount = cleaned.column("amount").is_ok();
    let mut aggs = vec![len().cast(DataType::Int64).alias("rows")];
    if has_amount {
        aggs.push(
            col("amount")
                .cast(DataType::Float64)
                .sum()
                .alias("amount_sum"),
        );
        aggs.push(
            col("amount")
                .cast(DataType::Float64)
                .mean()
                .alias("amount_mean"),
        );
    }

    let mut agg = cleaned
        .clone()
        .lazy()
        .filter(col(PROVENANCE_COLUMN).is_not_null())
        .group_by([col(PROVENANCE_COLUMN)])
        .agg(aggs)
        .sort([PROVENANCE_COLUMN], Default::default())
        .collect()?;

    if !has_amount {
        let height = agg.height();
        agg.with_column(Series::full_null(
            "amount_sum".into(),
            height,
            &DataType::Float64,
        ))?;
        agg.with_column(Series::full_null(
            "amount_mean".into(),
            height,
            &DataType::Float64,
        ))?;
    }
    Ok(agg)
}

/// One-row table comparing the merged table before and after cleaning.
pub fn overall_metrics(raw: &DataFrame, cleaned: &DataFrame) -> Result<DataFrame> {
    let rows_raw = raw.height() as i64;
    let rows_clean = cleaned.height() as i64;
    let duplicates_raw = if raw.height() > 0 {
        count_duplicates(raw)? as i64
    } else {
        0
    };

    let (missing_amount, total_revenue, avg_amount) = match cleaned.column("amount") {
        Ok(col) => {
            let values = col.cast(&DataType::Float64)?;
            let mut missing = 0_i64;
            let mut observed = 0_i64;
            let mut total = 0.0_f64;
            for opt_val in values.f64()?.into_iter() {
                match opt_val {
                    Some(v) if !v.is_nan() => {
                        observed += 1;
                        total += v;
                    }
                    _ => missing += 1,
                }
            }
            let avg = (observed > 0).then(|| total / observed as f64);
            (missing, Some(total), avg)
        }
        Err(_) => (0, None, None),
    };

    Ok(df![
        "rows_raw" => [rows_raw],
        "rows_clean" => [rows_clean],
        "duplicates_raw" => [duplicates_raw],
        "missing_amount_clean" => [missing_amount],
        "total_revenue_clean" => [total_revenue],
        "avg_order_amount_clean" => [avg_amount],
    ]?)
}

/// Describe-style summary of the numeric columns, identifiers excluded.
///
/// One row per column: non-missing count, mean, sample standard deviation,
/// min, the quartiles and max. Stats that need more data than a column has
/// stay null.
pub fn basic_stats(df: &DataFrame) -> Result<DataFrame> {
    let mut names: Vec<String> = Vec::new();
    let mut count: Vec<i64> = Vec::new();
    let mut mean: Vec<Option<f64>> = Vec::new();
    let mut std: Vec<Option<f64>> = Vec::new();
    let mut min: Vec<Option<f64>> = Vec::new();
    let mut q25: Vec<Option<f64>> = Vec::new();
    let mut median: Vec<Option<f64>> = Vec::new();
    let mut q75: Vec<Option<f64>> = Vec::new();
    let mut max: Vec<Option<f64>> = Vec::new();

    for col in df.get_columns() {
        let name = col.name().as_str();
        if ID_COLUMNS.contains(&name) || !is_numeric_dtype(col.dtype()) {
            continue;
        }
        let values: Vec<f64> = col
            .as_materialized_series()
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .flatten()
            .filter(|v| !v.is_nan())
            .collect();

        names.push(name.to_string());
        count.push(values.len() as i64);
        if values.is_empty() {
            mean.push(None);
            std.push(None);
            min.push(None);
            q25.push(None);
            median.push(None);
            q75.push(None);
            max.push(None);
            continue;
        }

        let m = values.iter().sum::<f64>() / values.len() as f64;
        mean.push(Some(m));
        std.push(sample_std(&values, m));
        min.push(Some(values.iter().copied().fold(f64::INFINITY, f64::min)));
        q25.push(quantile_linear(&values, 0.25));
        median.push(quantile_linear(&values, 0.5));
        q75.push(quantile_linear(&values, 0.75));
        max.push(Some(
            values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ));
    }

    Ok(df![
        "column" => names,
        "count" => count,
        "mean" => mean,
        "std" => std,
        "min" => min,
        "25%" => q25,
        "50%" => median,
        "75%" => q75,
        "max" => max,
    ]?)
}

/// Sample standard deviation. Needs at least two values.
fn sample_std(values: &[f64], mean: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

fn coefficient_frame(scores: &[FeatureScore]) -> Result<DataFrame> {
    let features: Vec<String> = scores.iter().map(|s| s.feature.clone()).collect();
    let coefs: Vec<f64> = scores.iter().map(|s| s.score).collect();
    let abs_coefs: Vec<f64> = scores.iter().map(|s| s.score.abs()).collect();
    Ok(df![
        "feature" => features,
        "coef" => coefs,
        "abs_coef" => abs_coefs,
    ]?)
}

fn importance_frame(scores: &[FeatureScore]) -> Result<DataFrame> {
    let features: Vec<String> = scores.iter().map(|s| s.feature.clone()).collect();
    let importances: Vec<f64> = scores.iter().map(|s| s.score).collect();
    Ok(df![
        "feature" => features,
        "importance" => importances,
    ]?)
}

/// Write one table under `dir`, returning the path on success.
fn write_csv(df: &mut DataFrame, dir: &Path, file_name: &str) -> Option<PathBuf> {
    let path = dir.join(file_name);
    let result = (|| -> Result<()> {
        fs::create_dir_all(dir)?;
        let mut file = File::create(&path)?;
        CsvWriter::new(&mut file).include_header(true).finish(df)?;
        Ok(())
    })();
    match result {
        Ok(()) => {
            debug!("Report table written: {}", path.display());
            Some(path)
        }
        Err(e) => {
            warn!("Failed to write report table {}: {}", path.display(), e);
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

    fn cleaned_fixture() -> DataFrame {
        df![
            "order_id" => [1i64, 2, 3, 4],
            "amount" => [Some(10.0), Some(30.0), None, Some(20.0)],
            "source" => ["db", "api", "db", "db"],
        ]
        .unwrap()
    }

    // -------------------------------------------------------------------------
    // aggregates_by_source
    // -------------------------------------------------------------------------

    #[test]
    fn test_aggregates_by_source_groups_and_sorts() {
        let agg = aggregates_by_source(&cleaned_fixture()).unwrap();
        assert_eq!(agg.height(), 2);
        let sources: Vec<Option<&str>> = agg
            .column(PROVENANCE_COLUMN)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(sources, vec![Some("api"), Some("db")]);

        let rows: Vec<Option<i64>> = agg
            .column("rows")
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(rows, vec![Some(1), Some(3)]);

        let sums: Vec<Option<f64>> = agg
            .column("amount_sum")
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(sums, vec![Some(30.0), Some(30.0)]);

        let means: Vec<Option<f64>> = agg
            .column("amount_mean")
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        // The null amount does not count toward the db mean.
        assert_eq!(means, vec![Some(30.0), Some(15.0)]);
    }

    #[test]
    fn test_aggregates_without_source_column() {
        let df = df!["amount" => [1.0, 2.0]].unwrap();
        let agg = aggregates_by_source(&df).unwrap();
        assert_eq!(agg.height(), 0);
        let names: Vec<&str> = agg.get_column_names().iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec![PROVENANCE_COLUMN, "rows", "amount_sum", "amount_mean"]);
    }

    #[test]
    fn test_aggregates_skip_null_source_rows() {
        let df = df![
            "amount" => [1.0, 2.0, 3.0],
            "source" => [Some("db"), None, Some("db")],
        ]
        .unwrap();
        let agg = aggregates_by_source(&df).unwrap();
        assert_eq!(agg.height(), 1);
        assert_eq!(
            agg.column("rows").unwrap().i64().unwrap().get(0),
            Some(2)
        );
    }

    // -------------------------------------------------------------------------
    // overall_metrics
    // -------------------------------------------------------------------------

    #[test]
    fn test_overall_metrics_counts() {
        let raw = df![
            "order_id" => [1i64, 1, 2],
            "amount" => [10.0, 10.0, 20.0],
        ]
        .unwrap();
        let cleaned = df![
            "order_id" => [1i64, 2],
            "amount" => [Some(10.0), None],
        ]
        .unwrap();
        let metrics = overall_metrics(&raw, &cleaned).unwrap();
        assert_eq!(metrics.height(), 1);
        let get_i64 = |name: &str| metrics.column(name).unwrap().i64().unwrap().get(0);
        assert_eq!(get_i64("rows_raw"), Some(3));
        assert_eq!(get_i64("rows_clean"), Some(2));
        assert_eq!(get_i64("duplicates_raw"), Some(1));
        assert_eq!(get_i64("missing_amount_clean"), Some(1));
        let get_f64 = |name: &str| metrics.column(name).unwrap().f64().unwrap().get(0);
        assert_eq!(get_f64("total_revenue_clean"), Some(10.0));
        assert_eq!(get_f64("avg_order_amount_clean"), Some(10.0));
    }

    #[test]
    fn test_overall_metrics_without_amount() {
        let raw = df!["country" => ["US"]].unwrap();
        let cleaned = df!["country" => ["US"]].unwrap();
        let metrics = overall_metrics(&raw, &cleaned).unwrap();
        assert_eq!(
            metrics.column("total_revenue_clean").unwrap().null_count(),
            1
        );
    }

    // -------------------------------------------------------------------------
    // basic_stats
    // -------------------------------------------------------------------------

    #[test]
    fn test_basic_stats_excludes_identifiers_and_text() {
        let df = df![
            "order_id" => [1i64, 2, 3, 4],
            "customer_id" => [1i64, 1, 2, 2],
            "amount" => [10.0, 20.0, 30.0, 40.0],
            "country" => ["US", "DE", "US", "DE"],
        ]
        .unwrap();
        let stats = basic_stats(&df).unwrap();
        assert_eq!(stats.height(), 1);
        assert_eq!(
            stats.column("column").unwrap().str().unwrap().get(0),
            Some("amount")
        );
        let get = |name: &str| stats.column(name).unwrap().f64().unwrap().get(0);
        assert_eq!(get("mean"), Some(25.0));
        assert_eq!(get("min"), Some(10.0));
        assert_eq!(get("max"), Some(40.0));
        assert_eq!(get("50%"), Some(25.0));
        assert_eq!(get("25%"), Some(17.5));
        assert_eq!(stats.column("count").unwrap().i64().unwrap().get(0), Some(4));
    }

    #[test]
    fn test_basic_stats_single_value_has_null_std() {
        let df = df!["amount" => [5.0]].unwrap();
        let stats = basic_stats(&df).unwrap();
        assert_eq!(stats.column("std").unwrap().null_count(), 1);
        assert_eq!(
            stats.column("mean").unwrap().f64().unwrap().get(0),
            Some(5.0)
        );
    }

    // -------------------------------------------------------------------------
    // run_reporting
    // -------------------------------------------------------------------------

    #[test]
    fn test_run_reporting_writes_tables() {
        let dir = tempdir().unwrap();
        let config = ReportingConfig {
            output_dir: dir.path().join("reports"),
            ..ReportingConfig::default()
        };
        let cleaned = cleaned_fixture();
        let ml = MlOutcome::default();

        let artifacts = run_reporting(&cleaned, &cleaned, &ml, &config);
        assert_eq!(artifacts.tables.len(), 3);
        for path in &artifacts.tables {
            assert!(path.exists(), "missing table {}", path.display());
        }
        assert!(artifacts.models.is_empty());
    }

    #[test]
    fn test_run_reporting_includes_ml_tables() {
        let dir = tempdir().unwrap();
        let config = ReportingConfig {
            output_dir: dir.path().join("reports"),
            ..ReportingConfig::default()
        };
        let mut ml = MlOutcome::default();
        ml.coefficients = vec![FeatureScore {
            feature: "dow".to_string(),
            score: -1.5,
        }];
        ml.importances = vec![FeatureScore {
            feature: "month".to_string(),
            score: 0.8,
        }];

        let cleaned = cleaned_fixture();
        let artifacts = run_reporting(&cleaned, &cleaned, &ml, &config);
        assert_eq!(artifacts.tables.len(), 5);
        let names: Vec<String> = artifacts
            .tables
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert!(names.contains(&"logreg_coeffs.csv".to_string()));
        assert!(names.contains(&"rf_importance.csv".to_string()));
    }
}
