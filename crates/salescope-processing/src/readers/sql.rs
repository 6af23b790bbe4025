//! PostgreSQL reader bridging the async driver into the synchronous
//! pipeline.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column as _, Row as _, TypeInfo as _};
use tracing::{info, warn};

use crate::config::{self, SqlSource};
use crate::error::{PipelineError, Result};
use crate::utils::{blocking_runtime, shorten_sql};

/// How a Postgres column type maps onto a frame column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PgTypeGroup {
    Int,
    Float,
    Bool,
    Text,
    Timestamp,
    Date,
    Unsupported,
}

fn pg_type_group(type_name: &str) -> PgTypeGroup {
    match type_name {
        "INT2" | "INT4" | "INT8" => PgTypeGroup::Int,
        "FLOAT4" | "FLOAT8" => PgTypeGroup::Float,
        "BOOL" => PgTypeGroup::Bool,
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => PgTypeGroup::Text,
        "TIMESTAMP" | "TIMESTAMPTZ" => PgTypeGroup::Timestamp,
        "DATE" => PgTypeGroup::Date,
        _ => PgTypeGroup::Unsupported,
    }
}

/// Run the source query against Postgres and return the rows as a
/// [`DataFrame`].
///
/// The connection string comes from `dsn` or the environment variable named
/// by `dsn_env` ([`config::DEFAULT_DSN_ENV`] when unset). A blank DSN or a
/// blank query short-circuits with a configuration error before any
/// connection attempt.
pub fn read_sql(source: &SqlSource) -> Result<DataFrame> {
    let dsn = config::resolve_dsn(source.dsn.as_deref(), source.dsn_env.as_deref());
    if dsn.trim().is_empty() {
        return Err(PipelineError::Configuration(format!(
            "sql source `{}`: no DSN configured",
            source.name
        )));
    }
    let query = source.query.trim();
    if query.is_empty() {
        return Err(PipelineError::Configuration(format!(
            "sql source `{}`: empty query",
            source.name
        )));
    }

    let runtime = blocking_runtime()?;
    let rows = runtime
        .block_on(fetch_rows(&dsn, query))
        .map_err(|e| classify_driver_error(e, query))?;
    let df = rows_to_dataframe(&rows)?;
    info!(
        "Read {} rows x {} columns from sql source '{}'",
        df.height(),
        df.width(),
        source.name
    );
    Ok(df)
}

async fn fetch_rows(dsn: &str, query: &str) -> std::result::Result<Vec<PgRow>, sqlx::Error> {
    let pool = PgPoolOptions::new().max_connections(1).connect(dsn).await?;
    let rows = sqlx::query(query).fetch_all(&pool).await;
    pool.close().await;
    rows
}

fn classify_driver_error(e: sqlx::Error, query: &str) -> PipelineError {
    let message = format!("query `{}`: {e}", shorten_sql(query));
    match e {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => PipelineError::Decode(message),
        _ => PipelineError::Transport(message),
    }
}

/// Convert fetched rows to a frame, one typed series per column.
///
/// Numeric widths widen to `Int64`/`Float64`, timestamps and dates land as
/// millisecond datetimes, and unsupported types become all-null columns with
/// a warning rather than failing the whole source.
fn rows_to_dataframe(rows: &[PgRow]) -> Result<DataFrame> {
    let Some(first) = rows.first() else {
        return Ok(DataFrame::empty());
    };

    let mut columns = Vec::with_capacity(first.columns().len());
    for (idx, col) in first.columns().iter().enumerate() {
        let name = col.name().to_string();
        let type_name = col.type_info().name().to_string();
        let series = match pg_type_group(&type_name) {
            PgTypeGroup::Int => {
                let values: Vec<Option<i64>> = rows
                    .iter()
                    .map(|r| decode_int(r, idx, &type_name))
                    .collect();
                Series::new(name.as_str().into(), values)
            }
            PgTypeGroup::Float => {
                let values: Vec<Option<f64>> = rows
                    .iter()
                    .map(|r| decode_float(r, idx, &type_name))
                    .collect();
                Series::new(name.as_str().into(), values)
            }
            PgTypeGroup::Bool => {
                let values: Vec<Option<bool>> = rows
                    .iter()
                    .map(|r| r.try_get::<Option<bool>, _>(idx).ok().flatten())
                    .collect();
                Series::new(name.as_str().into(), values)
            }
            PgTypeGroup::Text => {
                let values: Vec<Option<String>> = rows
                    .iter()
                    .map(|r| r.try_get::<Option<String>, _>(idx).ok().flatten())
                    .collect();
                Series::new(name.as_str().into(), values)
            }
            PgTypeGroup::Timestamp => {
                let values: Vec<Option<i64>> = rows
                    .iter()
                    .map(|r| decode_timestamp_ms(r, idx, &type_name))
                    .collect();
                Series::new(name.as_str().into(), values)
                    .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
            }
            PgTypeGroup::Date => {
                let values: Vec<Option<i64>> =
                    rows.iter().map(|r| decode_date_ms(r, idx)).collect();
                Series::new(name.as_str().into(), values)
                    .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
            }
            PgTypeGroup::Unsupported => {
                warn!(
                    "Unsupported sql type {} for column '{}', filling with nulls",
                    type_name, name
                );
                let values: Vec<Option<String>> = vec![None; rows.len()];
                Series::new(name.as_str().into(), values)
            }
        };
        columns.push(Column::from(series));
    }

    Ok(DataFrame::new(columns)?)
}

fn decode_int(row: &PgRow, idx: usize, type_name: &str) -> Option<i64> {
    match type_name {
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .ok()
            .flatten()
            .map(i64::from),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .ok()
            .flatten()
            .map(i64::from),
        _ => row.try_get::<Option<i64>, _>(idx).ok().flatten(),
    }
}

fn decode_float(row: &PgRow, idx: usize, type_name: &str) -> Option<f64> {
    match type_name {
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .ok()
            .flatten()
            .map(f64::from),
        _ => row.try_get::<Option<f64>, _>(idx).ok().flatten(),
    }
}

fn decode_timestamp_ms(row: &PgRow, idx: usize, type_name: &str) -> Option<i64> {
    match type_name {
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| dt.timestamp_millis()),
        _ => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| dt.and_utc().timestamp_millis()),
    }
}

fn decode_date_ms(row: &PgRow, idx: usize) -> Option<i64> {
    row.try_get::<Option<NaiveDate>, _>(idx)
        .ok()
        .flatten()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_dsn_short_circuits() {
        let source = SqlSource {
            name: "orders".to_string(),
            query: "SELECT 1".to_string(),
            dsn: None,
            dsn_env: Some("SALESCOPE_TEST_UNSET_DSN".to_string()),
            target: None,
        };
        let err = read_sql(&source).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert!(err.to_string().contains("no DSN configured"));
    }

    #[test]
    fn test_blank_query_short_circuits() {
        let source = SqlSource {
            name: "orders".to_string(),
            query: "   \n".to_string(),
            dsn: Some("postgres://localhost/sales".to_string()),
            dsn_env: None,
            target: None,
        };
        let err = read_sql(&source).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert!(err.to_string().contains("empty query"));
    }

    #[test]
    fn test_pg_type_group_mapping() {
        assert_eq!(pg_type_group("INT8"), PgTypeGroup::Int);
        assert_eq!(pg_type_group("FLOAT4"), PgTypeGroup::Float);
        assert_eq!(pg_type_group("BOOL"), PgTypeGroup::Bool);
        assert_eq!(pg_type_group("VARCHAR"), PgTypeGroup::Text);
        assert_eq!(pg_type_group("TIMESTAMPTZ"), PgTypeGroup::Timestamp);
        assert_eq!(pg_type_group("DATE"), PgTypeGroup::Date);
        assert_eq!(pg_type_group("NUMERIC"), PgTypeGroup::Unsupported);
        assert_eq!(pg_type_group("JSONB"), PgTypeGroup::Unsupported);
    }

    #[test]
    fn test_driver_error_carries_shortened_query() {
        let query = "SELECT ".to_string() + &"order_id, ".repeat(40);
        let err = classify_driver_error(sqlx::Error::PoolClosed, &query);
        assert_eq!(err.error_code(), "TRANSPORT_ERROR");
        assert!(err.to_string().contains("..."));
    }
}
