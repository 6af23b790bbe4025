//! Cleaning stage for the merged sales table.
//!
//! Coerces the well-known columns to their expected types, prunes columns
//! with excessive nulls and computes the duplicate/missing metrics carried
//! into the run summary. Rows are never dropped here.

use std::collections::BTreeMap;

use polars::prelude::*;
use tracing::{debug, info};

use crate::error::Result;
use crate::types::CleaningStats;
use crate::utils::{is_numeric_dtype, parse_numeric_string};

/// Columns whose null counts are always reported when present.
pub const KEY_COLUMNS: [&str; 5] = ["order_id", "customer_id", "order_date", "amount", "country"];

const DATETIME_LAYOUTS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d.%m.%Y %H:%M:%S",
];
const DATE_LAYOUTS: [&str; 4] = ["%Y-%m-%d", "%d.%m.%Y", "%m/%d/%Y", "%Y/%m/%d"];

/// Clean the merged sales table.
///
/// Type coercion never raises on bad values, they become null; columns whose
/// null fraction strictly exceeds `missing_threshold` are dropped with a log
/// line naming them.
pub fn clean(df: &DataFrame, missing_threshold: f64) -> Result<(DataFrame, CleaningStats)> {
    let rows_before = df.height();
    if rows_before == 0 {
        debug!("Empty sales table, nothing to clean");
        return Ok((df.clone(), CleaningStats::default()));
    }

    let coerced = coerce_types(df)?;
    let (cleaned, dropped_columns) = drop_high_missing_columns(coerced, missing_threshold);
    if dropped_columns.is_empty() {
        info!(
            "No columns above the {} missing-share threshold",
            missing_threshold
        );
    } else {
        info!(
            "Dropped {} high-missing column(s): {:?}",
            dropped_columns.len(),
            dropped_columns
        );
    }

    let duplicates = count_duplicates(&cleaned)?;
    let mut missing = BTreeMap::new();
    for name in KEY_COLUMNS {
        if let Ok(col) = cleaned.column(name) {
            missing.insert(name.to_string(), col.null_count());
        }
    }

    let stats = CleaningStats {
        rows_before,
        rows_after: cleaned.height(),
        duplicates,
        dropped_columns,
        missing,
    };
    Ok((cleaned, stats))
}

/// Coerce the well-known columns: ids to `Int64`, `amount` to `Float64`,
/// `order_date` to a millisecond datetime. Absent columns are ignored.
fn coerce_types(df: &DataFrame) -> Result<DataFrame> {
    let mut out = df.clone();
    for name in ["order_id", "customer_id"] {
        if let Ok(col) = out.column(name) {
            let series = col.as_materialized_series().clone();
            let coerced = coerce_to_int64(&series)?;
            out.replace(name, coerced)?;
        }
    }
    if let Ok(col) = out.column("amount") {
        let series = col.as_materialized_series().clone();
        let coerced = coerce_to_float64(&series)?;
        out.replace("amount", coerced)?;
    }
    if let Ok(col) = out.column("order_date") {
        let series = col.as_materialized_series().clone();
        let coerced = coerce_to_datetime(&series)?;
        out.replace("order_date", coerced)?;
    }
    Ok(out)
}

fn coerce_to_int64(series: &Series) -> Result<Series> {
    match series.dtype() {
        DataType::Int64 => Ok(series.clone()),
        DataType::String => {
            let str_series = series.str()?;
            let mut values: Vec<Option<i64>> = Vec::with_capacity(str_series.len());
            for opt_val in str_series.into_iter() {
                values.push(opt_val.and_then(parse_numeric_string).map(|v| v as i64));
            }
            Ok(Series::new(series.name().clone(), values))
        }
        dtype if is_numeric_dtype(dtype) || dtype == &DataType::Boolean => {
            Ok(series.cast(&DataType::Int64)?)
        }
        _ => Ok(series.clone()),
    }
}

fn coerce_to_float64(series: &Series) -> Result<Series> {
    match series.dtype() {
        DataType::Float64 => Ok(series.clone()),
        DataType::String => {
            let str_series = series.str()?;
            let mut values: Vec<Option<f64>> = Vec::with_capacity(str_series.len());
            for opt_val in str_series.into_iter() {
                values.push(opt_val.and_then(parse_numeric_string));
            }
            Ok(Series::new(series.name().clone(), values))
        }
        dtype if is_numeric_dtype(dtype) || dtype == &DataType::Boolean => {
            Ok(series.cast(&DataType::Float64)?)
        }
        _ => Ok(series.clone()),
    }
}

pub(crate) fn coerce_to_datetime(series: &Series) -> Result<Series> {
    match series.dtype() {
        DataType::Datetime(TimeUnit::Milliseconds, _) => Ok(series.clone()),
        DataType::Datetime(_, _) | DataType::Date => {
            Ok(series.cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
        }
        DataType::String => {
            let str_series = series.str()?;
            let mut values: Vec<Option<i64>> = Vec::with_capacity(str_series.len());
            for opt_val in str_series.into_iter() {
                values.push(opt_val.and_then(parse_datetime_ms));
            }
            Ok(Series::new(series.name().clone(), values)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
        }
        dtype if is_numeric_dtype(dtype) => {
            let as_int = series.cast(&DataType::Int64)?;
            let ints = as_int.i64()?;
            let mut values: Vec<Option<i64>> = Vec::with_capacity(ints.len());
            for opt_val in ints.into_iter() {
                values.push(opt_val.and_then(epoch_to_ms));
            }
            Ok(Series::new(series.name().clone(), values)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
        }
        _ => Ok(series.clone()),
    }
}

/// Parse one date string into epoch milliseconds.
///
/// Tries RFC 3339 first, then the common datetime and date layouts, then
/// bare epoch seconds or milliseconds.
fn parse_datetime_ms(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp_millis());
    }
    for layout in DATETIME_LAYOUTS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(trimmed, layout) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    for layout in DATE_LAYOUTS {
        if let Ok(d) = chrono::NaiveDate::parse_from_str(trimmed, layout) {
            return d
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp_millis());
        }
    }
    trimmed.parse::<i64>().ok().and_then(epoch_to_ms)
}

/// Interpret an integer as epoch seconds or milliseconds, range-checked to
/// plausible recent dates.
fn epoch_to_ms(value: i64) -> Option<i64> {
    if (1_000_000_000..2_000_000_000).contains(&value) {
        Some(value * 1000)
    } else if (1_000_000_000_000..2_000_000_000_000).contains(&value) {
        Some(value)
    } else {
        None
    }
}

fn drop_high_missing_columns(df: DataFrame, threshold: f64) -> (DataFrame, Vec<String>) {
    if df.height() == 0 {
        return (df, Vec::new());
    }
    let height = df.height() as f64;
    let dropped: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|col| col.null_count() as f64 / height > threshold)
        .map(|col| col.name().to_string())
        .collect();
    if dropped.is_empty() {
        return (df, dropped);
    }
    let pruned = df.drop_many(dropped.iter().map(String::as_str));
    (pruned, dropped)
}

pub(crate) fn count_duplicates(df: &DataFrame) -> Result<usize> {
    if df.height() == 0 {
        return Ok(0);
    }
    let distinct = df.unique::<&str, &str>(None, UniqueKeepStrategy::First, None)?;
    Ok(df.height() - distinct.height())
}

// ============================================================================
// Tests
// ============================================================================
