//! Persistence for the combined and cleaned tables.
//!
//! Parquet snapshots go to the configured paths; the optional relational
//! export synthesizes a `CREATE TABLE IF NOT EXISTS` from the frame schema
//! and appends the rows in batched inserts over the same driver the SQL
//! reader uses.

use std::fs::{self, File};
use std::path::Path;

use polars::prelude::*;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::utils::blocking_runtime;

/// Rows per `INSERT` statement in the relational export.
const INSERT_BATCH_ROWS: usize = 500;

/// Write a table as parquet, creating parent directories as needed.
pub fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    ParquetWriter::new(file).finish(df)?;
    info!("Parquet written: {} ({} rows)", path.display(), df.height());
    Ok(())
}

/// Append a table to a PostgreSQL database, creating it first if missing.
pub fn write_table(df: &DataFrame, table: &str, dsn: &str) -> Result<()> {
    if dsn.trim().is_empty() {
        return Err(PipelineError::Configuration(
            "no DSN configured for the database export".to_string(),
        ));
    }
    if table.trim().is_empty() {
        return Err(PipelineError::Configuration(
            "empty table name for the database export".to_string(),
        ));
    }
    if df.width() == 0 {
        return Err(PipelineError::Configuration(
            "table has no columns to export".to_string(),
        ));
    }

    let mut statements = vec![create_table_sql(table, df)];
    statements.extend(insert_statements(table, df, INSERT_BATCH_ROWS)?);

    blocking_runtime()?
        .block_on(execute_statements(dsn, &statements))
        .map_err(|e| PipelineError::Transport(format!("table `{table}`: {e}")))?;
    info!("Exported {} rows to table '{}'", df.height(), table);
    Ok(())
}

async fn execute_statements(dsn: &str, statements: &[String]) -> sqlx::Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(dsn)
        .await?;
    let result = async {
        for statement in statements {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(())
    }
    .await;
    pool.close().await;
    result
}

/// `CREATE TABLE IF NOT EXISTS` matching the frame schema.
fn create_table_sql(table: &str, df: &DataFrame) -> String {
    let columns: Vec<String> = df
        .get_columns()
        .iter()
        .map(|col| {
            format!(
                "{} {}",
                quote_ident(col.name().as_str()),
                sql_type(col.dtype())
            )
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        columns.join(", ")
    )
}

fn sql_type(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Float32 | DataType::Float64 => "DOUBLE PRECISION",
        DataType::Boolean => "BOOLEAN",
        DataType::Datetime(_, _) | DataType::Date => "TIMESTAMP",
        dt if crate::utils::is_numeric_dtype(dt) => "BIGINT",
        _ => "TEXT",
    }
}

/// Batched `INSERT` statements covering every row of the frame.
fn insert_statements(table: &str, df: &DataFrame, batch_rows: usize) -> Result<Vec<String>> {
    if df.height() == 0 {
        return Ok(Vec::new());
    }
    let columns: Vec<Vec<String>> = df
        .get_columns()
        .iter()
        .map(column_literals)
        .collect::<Result<_>>()?;
    let column_list = df
        .get_column_names()
        .iter()
        .map(|name| quote_ident(name.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut statements = Vec::new();
    let mut row = 0;
    while row < df.height() {
        let end = (row + batch_rows).min(df.height());
        let mut tuples = Vec::with_capacity(end - row);
        for i in row..end {
            let cells: Vec<&str> = columns.iter().map(|c| c[i].as_str()).collect();
            tuples.push(format!("({})", cells.join(", ")));
        }
        statements.push(format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(table),
            column_list,
            tuples.join(", ")
        ));
        row = end;
    }
    Ok(statements)
}

/// Render one column as SQL value literals, `NULL` included.
fn column_literals(col: &Column) -> Result<Vec<String>> {
    let series = col.as_materialized_series();
    match series.dtype() {
        DataType::Boolean => {
            let mut out = Vec::with_capacity(series.len());
            for opt_val in series.bool()?.into_iter() {
                out.push(match opt_val {
                    Some(true) => "TRUE".to_string(),
                    Some(false) => "FALSE".to_string(),
                    None => "NULL".to_string(),
                });
            }
            Ok(out)
        }
        DataType::Float32 | DataType::Float64 => {
            let values = series.cast(&DataType::Float64)?;
            let mut out = Vec::with_capacity(series.len());
            for opt_val in values.f64()?.into_iter() {
                out.push(match opt_val {
                    Some(v) if v.is_finite() => format!("{v}"),
                    _ => "NULL".to_string(),
                });
            }
            Ok(out)
        }
        DataType::Datetime(_, _) | DataType::Date => {
            let ms = series
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
                .cast(&DataType::Int64)?;
            let mut out = Vec::with_capacity(series.len());
            for opt_val in ms.i64()?.into_iter() {
                out.push(
                    opt_val
                        .and_then(chrono::DateTime::from_timestamp_millis)
                        .map_or("NULL".to_string(), |dt| {
                            format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.3f"))
                        }),
                );
            }
            Ok(out)
        }
        dt if crate::utils::is_numeric_dtype(dt) => {
            let values = series.cast(&DataType::Int64)?;
            let mut out = Vec::with_capacity(series.len());
            for opt_val in values.i64()?.into_iter() {
                out.push(opt_val.map_or("NULL".to_string(), |v| v.to_string()));
            }
            Ok(out)
        }
        _ => {
            let values = series.cast(&DataType::String)?;
            let mut out = Vec::with_capacity(series.len());
            for opt_val in values.str()?.into_iter() {
                out.push(opt_val.map_or("NULL".to_string(), quote_str));
            }
            Ok(out)
        }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn typed_fixture() -> DataFrame {
        let mut df = df![
            "order_id" => [1i64, 2],
            "amount" => [10.5, 20.0],
            "refunded" => [true, false],
            "country" => ["US", "DE"],
            "order_date" => [86_400_000i64, 172_800_000],
        ]
        .unwrap();
        let ts = df
            .column("order_date")
            .unwrap()
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .unwrap();
        df.replace("order_date", ts.as_materialized_series().clone())
            .unwrap();
        df
    }

    // -------------------------------------------------------------------------
    // DDL synthesis
    // -------------------------------------------------------------------------

    #[test]
    fn test_create_table_sql_maps_types() {
        let df = typed_fixture();
        let ddl = create_table_sql("sales_clean", &df);
        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS \"sales_clean\" (\
             \"order_id\" BIGINT, \
             \"amount\" DOUBLE PRECISION, \
             \"refunded\" BOOLEAN, \
             \"country\" TEXT, \
             \"order_date\" TIMESTAMP)"
        );
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    // -------------------------------------------------------------------------
    // Insert rendering
    // -------------------------------------------------------------------------

    #[test]
    fn test_insert_statements_render_literals() {
        let df = typed_fixture();
        let statements = insert_statements("sales_clean", &df, 100).unwrap();
        assert_eq!(statements.len(), 1);
        let sql = &statements[0];
        assert!(sql.starts_with("INSERT INTO \"sales_clean\" (\"order_id\", "));
        assert!(sql.contains("(1, 10.5, TRUE, 'US', '1970-01-02 00:00:00.000')"));
        assert!(sql.contains("(2, 20, FALSE, 'DE', '1970-01-03 00:00:00.000')"));
    }

    #[test]
    fn test_insert_statements_batch_rows() {
        let df = df!["n" => [1i64, 2, 3, 4, 5]].unwrap();
        let statements = insert_statements("t", &df, 2).unwrap();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].ends_with("VALUES (1), (2)"));
        assert!(statements[2].ends_with("VALUES (5)"));
    }

    #[test]
    fn test_insert_statements_escape_and_null() {
        let df = df![
            "name" => [Some("O'Brien"), None],
            "amount" => [Some(1.0), None],
        ]
        .unwrap();
        let statements = insert_statements("t", &df, 100).unwrap();
        assert!(statements[0].contains("('O''Brien', 1)"));
        assert!(statements[0].contains("(NULL, NULL)"));
    }

    #[test]
    fn test_insert_statements_empty_frame() {
        let df = df!["n" => Vec::<i64>::new()].unwrap();
        assert!(insert_statements("t", &df, 10).unwrap().is_empty());
    }

    // -------------------------------------------------------------------------
    // Parquet
    // -------------------------------------------------------------------------

    #[test]
    fn test_write_parquet_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("processed/cleaned.parquet");
        let mut df = typed_fixture();
        write_parquet(&mut df, &path).unwrap();

        let restored = ParquetReader::new(File::open(&path).unwrap())
            .finish()
            .unwrap();
        assert_eq!(restored.shape(), df.shape());
    }

    // -------------------------------------------------------------------------
    // Export guards
    // -------------------------------------------------------------------------

    #[test]
    fn test_write_table_requires_dsn() {
        let df = df!["n" => [1i64]].unwrap();
        let err = write_table(&df, "t", "  ").unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_write_table_requires_columns() {
        let err = write_table(&DataFrame::empty(), "t", "postgres://x").unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }
}
