//! Feature engineering for the cleaned sales table.
//!
//! Derives calendar columns from `order_date`, one-hot encodes the
//! provenance column and computes per-customer history features. The
//! resulting frame feeds both training tasks; identifier columns never
//! reach a model.

use std::collections::HashMap;

use chrono::Datelike;
use polars::prelude::*;

use crate::aggregate::PROVENANCE_COLUMN;
use crate::cleaning::coerce_to_datetime;
use crate::error::{PipelineError, Result};
use crate::utils::{is_numeric_dtype, quantile_linear};

/// Identifier columns excluded from every feature matrix.
pub const ID_COLUMNS: [&str; 2] = ["order_id", "customer_id"];

/// Derived columns whose nulls become zero once derivation is done.
const FILL_ZERO_COLUMNS: [&str; 5] =
    ["_cnt_prev", "_amount_prev_mean", "dow", "month", "is_weekend"];

/// Running per-customer totals while walking the table top to bottom.
#[derive(Default)]
struct CustomerState {
    seen: i64,
    amount_count: u32,
    amount_sum: f64,
}

/// Derive model features from the cleaned sales table.
///
/// Every derivation is conditional on its input column being present:
/// `order_date` yields `dow` (Monday is 0), `month` and `is_weekend`;
/// the provenance column becomes sorted `src_*` indicator columns;
/// `customer_id` yields `_cnt_prev` (orders seen before this row) and,
/// when `amount` exists, `_amount_prev_mean` (mean of the customer's
/// prior amounts). Nulls in the derived columns are filled with zero
/// and `order_id` is dropped.
pub fn build_features(df: &DataFrame) -> Result<DataFrame> {
    let mut out = df.clone();

    if let Ok(col) = out.column("order_date") {
        let datetime = coerce_to_datetime(col.as_materialized_series())?;
        let (dow, month, is_weekend) = calendar_columns(&datetime)?;
        out.with_column(dow)?;
        out.with_column(month)?;
        out.with_column(is_weekend)?;
    }

    if out.column(PROVENANCE_COLUMN).is_ok() {
        out = one_hot_provenance(out)?;
    }

    if out.column("customer_id").is_ok() {
        out = customer_history(out)?;
    }

    for name in FILL_ZERO_COLUMNS {
        if let Ok(col) = out.column(name) {
            let filled = col
                .as_materialized_series()
                .fill_null(FillNullStrategy::Zero)?;
            out.replace(name, filled)?;
        }
    }

    if out.column("order_id").is_ok() {
        out = out.drop("order_id")?;
    }
    Ok(out)
}

/// Day-of-week, month and weekend flag from a millisecond datetime series.
///
/// A series that did not coerce to a datetime yields all-null columns,
/// which the zero fill turns into zeros downstream.
fn calendar_columns(series: &Series) -> Result<(Series, Series, Series)> {
    let height = series.len();
    let mut dow: Vec<Option<i64>> = Vec::with_capacity(height);
    let mut month: Vec<Option<i64>> = Vec::with_capacity(height);
    let mut weekend: Vec<Option<i64>> = Vec::with_capacity(height);

    if matches!(series.dtype(), DataType::Datetime(_, _)) {
        let ms = series
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
            .cast(&DataType::Int64)?;
        for opt_val in ms.i64()?.into_iter() {
            match opt_val.and_then(chrono::DateTime::from_timestamp_millis) {
                Some(dt) => {
                    let day = i64::from(dt.weekday().num_days_from_monday());
                    dow.push(Some(day));
                    month.push(Some(i64::from(dt.month())));
                    weekend.push(Some(i64::from(day >= 5)));
                }
                None => {
                    dow.push(None);
                    month.push(None);
                    weekend.push(None);
                }
            }
        }
    } else {
        dow.resize(height, None);
        month.resize(height, None);
        weekend.resize(height, None);
    }

    Ok((
        Series::new("dow".into(), dow),
        Series::new("month".into(), month),
        Series::new("is_weekend".into(), weekend),
    ))
}

/// Replace the provenance column with one `src_<label>` indicator column per
/// distinct label, in sorted order. Null labels get zero in every indicator.
fn one_hot_provenance(mut df: DataFrame) -> Result<DataFrame> {
    let label_col = df.column(PROVENANCE_COLUMN)?.cast(&DataType::String)?;
    let labels = label_col.str()?;

    let mut categories: Vec<String> = labels.into_iter().flatten().map(str::to_string).collect();
    categories.sort();
    categories.dedup();

    let mut indicators = Vec::with_capacity(categories.len());
    for category in &categories {
        let mut flags: Vec<i64> = Vec::with_capacity(labels.len());
        for opt_val in labels.into_iter() {
            flags.push(i64::from(opt_val == Some(category.as_str())));
        }
        indicators.push(Series::new(format!("src_{category}").into(), flags));
    }

    for series in indicators {
        df.with_column(series)?;
    }
    Ok(df.drop(PROVENANCE_COLUMN)?)
}

/// Append `_cnt_prev` and, when `amount` exists, `_amount_prev_mean`.
///
/// Both look strictly backwards in the current row order. Rows with a null
/// `customer_id` belong to no group and stay null until the zero fill.
fn customer_history(mut df: DataFrame) -> Result<DataFrame> {
    let id_col = df.column("customer_id")?.cast(&DataType::Int64)?;
    let ids: Vec<Option<i64>> = id_col.i64()?.into_iter().collect();

    let amounts: Option<Vec<Option<f64>>> = match df.column("amount") {
        Ok(col) => Some(col.cast(&DataType::Float64)?.f64()?.into_iter().collect()),
        Err(_) => None,
    };

    let mut history: HashMap<i64, CustomerState> = HashMap::new();
    let mut cnt_prev: Vec<Option<i64>> = Vec::with_capacity(ids.len());
    let mut prev_mean: Vec<Option<f64>> = Vec::with_capacity(ids.len());

    for (i, opt_id) in ids.iter().enumerate() {
        let Some(id) = opt_id else {
            cnt_prev.push(None);
            prev_mean.push(None);
            continue;
        };
        let state = history.entry(*id).or_default();
        cnt_prev.push(Some(state.seen));
        if state.amount_count > 0 {
            prev_mean.push(Some(state.amount_sum / f64::from(state.amount_count)));
        } else {
            prev_mean.push(None);
        }
        state.seen += 1;
        if let Some(values) = &amounts {
            // NaN behaves like a missing amount.
            if let Some(v) = values[i] {
                if !v.is_nan() {
                    state.amount_sum += v;
                    state.amount_count += 1;
                }
            }
        }
    }

    df.with_column(Series::new("_cnt_prev".into(), cnt_prev))?;
    if amounts.is_some() {
        df.with_column(Series::new("_amount_prev_mean".into(), prev_mean))?;
    }
    Ok(df)
}

/// Binary labels for the high-value classifier.
///
/// An explicit `target` column is used as-is when present; otherwise the
/// label marks rows whose `amount` reaches the `q` quantile of non-null
/// amounts. Returns the labels and the target name carried into metrics.
pub fn classification_target(
    df: &DataFrame,
    target: Option<&str>,
    q: f64,
) -> Result<(Vec<i64>, String)> {
    if let Some(name) = target {
        if let Ok(col) = df.column(name) {
            let values = col.cast(&DataType::Float64)?;
            let mut labels = Vec::with_capacity(values.len());
            for opt_val in values.f64()?.into_iter() {
                match opt_val {
                    Some(v) if !v.is_nan() => labels.push(i64::from(v != 0.0)),
                    _ => {
                        return Err(PipelineError::Configuration(format!(
                            "target column `{name}` contains missing values"
                        )));
                    }
                }
            }
            return Ok((labels, name.to_string()));
        }
    }

    let amount = df.column("amount").map_err(|_| {
        PipelineError::Configuration(
            "no `amount` column to derive a classification target from".to_string(),
        )
    })?;
    let amount = amount.cast(&DataType::Float64)?;
    let observed: Vec<f64> = amount
        .f64()?
        .into_iter()
        .flatten()
        .filter(|v| !v.is_nan())
        .collect();
    let threshold = quantile_linear(&observed, q).ok_or_else(|| {
        PipelineError::Configuration(
            "all `amount` values are missing, cannot derive a threshold".to_string(),
        )
    })?;

    let labels: Vec<i64> = amount
        .f64()?
        .into_iter()
        .map(|opt_val| i64::from(opt_val.is_some_and(|v| v >= threshold)))
        .collect();
    Ok((labels, format!("high_value_q{q:.2}")))
}

/// Keep the numeric columns of `df` minus `drop` and the identifiers,
/// null-filled with zero and cast to `Float64`.
///
/// Returns the feature frame and its column names in frame order.
pub fn select_numeric_features(df: &DataFrame, drop: &[&str]) -> Result<(DataFrame, Vec<String>)> {
    let mut columns = Vec::new();
    let mut names = Vec::new();
    for col in df.get_columns() {
        let name = col.name().as_str();
        if drop.contains(&name) || ID_COLUMNS.contains(&name) {
            continue;
        }
        if !is_numeric_dtype(col.dtype()) {
            continue;
        }
        let series = col
            .as_materialized_series()
            .cast(&DataType::Float64)?
            .fill_null(FillNullStrategy::Zero)?;
        names.push(name.to_string());
        columns.push(Column::from(series));
    }
    Ok((DataFrame::new(columns)?, names))
}

// ============================================================================
// Tests
// ============================================================================
