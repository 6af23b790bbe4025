//! Shared utilities for the ingestion and processing pipeline.
//!
//! This module contains common helper functions used across multiple modules
//! to reduce code duplication and ensure consistency.

use polars::prelude::*;

// =============================================================================
// Data Type Utilities
// =============================================================================

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Check if a DataType is a datetime type.
#[inline]
pub fn is_datetime_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Datetime(_, _) | DataType::Date | DataType::Time
    )
}

// =============================================================================
// String Parsing Utilities
// =============================================================================

/// Characters commonly used in numeric formatting that should be stripped.
pub const NUMERIC_FORMAT_CHARS: [char; 5] = [',', '$', '€', '£', ' '];

/// Common missing value markers in raw exports.
pub const MISSING_MARKERS: [&str; 7] = ["", "n/a", "na", "null", "none", "nan", "-"];

/// Check if a string is a missing value marker.
pub fn is_missing_marker(s: &str) -> bool {
    let lower = s.trim().to_ascii_lowercase();
    MISSING_MARKERS.iter().any(|&marker| lower == marker)
}

/// Clean a string for numeric parsing by removing formatting characters.
pub fn clean_numeric_string(s: &str) -> String {
    let mut result = s.trim().to_string();
    for c in NUMERIC_FORMAT_CHARS {
        result = result.replace(c, "");
    }
    result
}

/// Try to parse a string as a numeric value (f64).
///
/// Handles common formatting like currency symbols and thousands separators.
pub fn parse_numeric_string(s: &str) -> Option<f64> {
    let cleaned = clean_numeric_string(s);
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

// =============================================================================
// Statistics Utilities
// =============================================================================

/// Quantile with linear interpolation between the two nearest ranks.
///
/// Returns `None` for an empty slice. Ignores nothing: callers filter out
/// nulls and NaNs before handing values over.
pub fn quantile_linear(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

// =============================================================================
// SQL Utilities
// =============================================================================

/// Maximum query length carried into logs and error messages.
pub const SQL_LOG_MAX_LEN: usize = 120;

/// Collapse whitespace in a query and truncate it for logging.
///
/// Multi-line queries become a single line, capped at [`SQL_LOG_MAX_LEN`]
/// characters with a trailing `...`, so diagnostics stay readable without
/// leaking whole statements.
pub fn shorten_sql(query: &str) -> String {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SQL_LOG_MAX_LEN {
        collapsed
    } else {
        let mut short: String = collapsed.chars().take(SQL_LOG_MAX_LEN).collect();
        short.push_str("...");
        short
    }
}

/// Build the private current-thread runtime that drives the async database
/// driver from synchronous code.
pub(crate) fn blocking_runtime() -> crate::error::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            crate::error::PipelineError::Internal(format!("failed to build tokio runtime: {e}"))
        })
}

// =============================================================================
// Tests
// =============================================================================
