//! Excel source reader.
//!
//! Worksheet cells are scanned once to settle a type per column (integer,
//! float, boolean or text), then materialized into typed polars columns.
//! Mixed columns degrade to text; date cells are rendered as ISO strings and
//! recovered later by the cleaning stage's coercions.

use std::collections::HashMap;
use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use polars::prelude::*;
use tracing::info;

use crate::error::{PipelineError, Result};

/// Read one worksheet into a DataFrame, first row as header.
///
/// A missing path or a missing named sheet is `NotFound`. When no sheet is
/// given, the first sheet in workbook order is selected so the choice stays
/// deterministic across runs.
pub fn read_excel(path: &Path, sheet: Option<&str>) -> Result<DataFrame> {
    if !path.exists() {
        return Err(PipelineError::NotFound(path.display().to_string()));
    }

    let mut workbook = open_workbook_auto(path)
        .map_err(|e| PipelineError::Decode(format!("{}: {e}", path.display())))?;

    let sheet_names = workbook.sheet_names();
    let sheet_name = match sheet {
        Some(name) => {
            if !sheet_names.iter().any(|s| s == name) {
                return Err(PipelineError::NotFound(format!(
                    "sheet '{name}' in {}",
                    path.display()
                )));
            }
            name.to_string()
        }
        None => sheet_names.first().cloned().ok_or_else(|| {
            PipelineError::Decode(format!("{}: workbook has no sheets", path.display()))
        })?,
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| PipelineError::Decode(format!("{}[{sheet_name}]: {e}", path.display())))?;

    let rows: Vec<&[Data]> = range.rows().collect();
    let df = rows_to_dataframe(&rows)?;

    info!(
        "Read {} rows x {} columns from {} [{}]",
        df.height(),
        df.width(),
        path.display(),
        sheet_name
    );
    Ok(df)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColType {
    Unknown,
    Int,
    Float,
    Bool,
    Text,
}

/// Fold one cell into the running column type.
///
/// Text always wins, integers widen to floats, and booleans mixed with
/// anything else degrade to text rather than risk a bad cast.
fn merge_type(cur: ColType, cell: &Data) -> ColType {
    match cell {
        Data::Empty | Data::Error(_) => cur,
        Data::String(s) if s.trim().is_empty() => cur,
        Data::String(_) | Data::DateTime(_) | Data::DateTimeIso(_) | Data::DurationIso(_) => {
            ColType::Text
        }
        Data::Bool(_) => match cur {
            ColType::Unknown | ColType::Bool => ColType::Bool,
            _ => ColType::Text,
        },
        Data::Int(_) => match cur {
            ColType::Unknown | ColType::Int => ColType::Int,
            ColType::Float => ColType::Float,
            ColType::Bool | ColType::Text => ColType::Text,
        },
        Data::Float(f) => match cur {
            ColType::Unknown | ColType::Int => {
                if f.fract() == 0.0 && f.is_finite() {
                    ColType::Int
                } else {
                    ColType::Float
                }
            }
            ColType::Float => ColType::Float,
            ColType::Bool | ColType::Text => ColType::Text,
        },
    }
}

fn cell_to_i64(cell: Option<&Data>) -> Option<i64> {
    match cell {
        Some(Data::Int(i)) => Some(*i),
        Some(Data::Float(f))
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 =>
        {
            Some(*f as i64)
        }
        _ => None,
    }
}

fn cell_to_f64(cell: Option<&Data>) -> Option<f64> {
    match cell {
        Some(Data::Int(i)) => Some(*i as f64),
        Some(Data::Float(f)) => Some(*f),
        _ => None,
    }
}

fn cell_to_bool(cell: Option<&Data>) -> Option<bool> {
    match cell {
        Some(Data::Bool(b)) => Some(*b),
        _ => None,
    }
}

fn cell_to_string(cell: Option<&Data>) -> Option<String> {
    match cell? {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
    }
}

/// Header names from the first row; blank cells get positional names and
/// repeats get numeric suffixes.
fn header_names(header: &[Data]) -> Vec<String> {
    let mut names: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(i, cell)| cell_to_string(Some(cell)).unwrap_or_else(|| format!("col_{i}")))
        .collect();

    let mut seen: HashMap<String, usize> = HashMap::new();
    for name in names.iter_mut() {
        let n = seen.entry(name.clone()).or_insert(0);
        if *n > 0 {
            *name = format!("{}_{}", name, n);
        }
        *n += 1;
    }
    names
}

fn rows_to_dataframe(rows: &[&[Data]]) -> Result<DataFrame> {
    let Some((header, data_rows)) = rows.split_first() else {
        return Ok(DataFrame::empty());
    };

    let names = header_names(header);
    let ncols = names.len();

    let mut types = vec![ColType::Unknown; ncols];
    for row in data_rows {
        for (i, col_type) in types.iter_mut().enumerate() {
            if let Some(cell) = row.get(i) {
                *col_type = merge_type(*col_type, cell);
            }
        }
    }

    let mut columns = Vec::with_capacity(ncols);
    for (i, (name, col_type)) in names.iter().zip(&types).enumerate() {
        let series = match col_type {
            ColType::Int => {
                let values: Vec<Option<i64>> =
                    data_rows.iter().map(|row| cell_to_i64(row.get(i))).collect();
                Series::new(name.as_str().into(), values)
            }
            ColType::Float => {
                let values: Vec<Option<f64>> =
                    data_rows.iter().map(|row| cell_to_f64(row.get(i))).collect();
                Series::new(name.as_str().into(), values)
            }
            ColType::Bool => {
                let values: Vec<Option<bool>> =
                    data_rows.iter().map(|row| cell_to_bool(row.get(i))).collect();
                Series::new(name.as_str().into(), values)
            }
            ColType::Unknown | ColType::Text => {
                let values: Vec<Option<String>> = data_rows
                    .iter()
                    .map(|row| cell_to_string(row.get(i)))
                    .collect();
                Series::new(name.as_str().into(), values)
            }
        };
        columns.push(Column::from(series));
    }

    Ok(DataFrame::new(columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_refs(rows: &[Vec<Data>]) -> Vec<&[Data]> {
        rows.iter().map(|r| r.as_slice()).collect()
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = read_excel(Path::new("no/such/file.xlsx"), None).unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_rows_to_dataframe_types() {
        let rows = vec![
            vec![
                Data::String("order_id".to_string()),
                Data::String("amount".to_string()),
                Data::String("country".to_string()),
            ],
            vec![
                Data::Int(1),
                Data::Float(10.5),
                Data::String("DE".to_string()),
            ],
            vec![Data::Float(2.0), Data::Float(20.0), Data::Empty],
        ];
        let df = rows_to_dataframe(&as_refs(&rows)).unwrap();

        assert_eq!(df.shape(), (2, 3));
        assert_eq!(df.column("order_id").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("amount").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("country").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("country").unwrap().null_count(), 1);
    }

    #[test]
    fn test_mixed_column_degrades_to_text() {
        let rows = vec![
            vec![Data::String("x".to_string())],
            vec![Data::Int(1)],
            vec![Data::String("two".to_string())],
        ];
        let df = rows_to_dataframe(&as_refs(&rows)).unwrap();
        assert_eq!(df.column("x").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_integral_floats_stay_int() {
        let rows = vec![
            vec![Data::String("id".to_string())],
            vec![Data::Float(1.0)],
            vec![Data::Float(2.0)],
        ];
        let df = rows_to_dataframe(&as_refs(&rows)).unwrap();
        assert_eq!(df.column("id").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn test_header_fallbacks_and_dedup() {
        let header = vec![
            Data::String("amount".to_string()),
            Data::Empty,
            Data::String("amount".to_string()),
        ];
        let names = header_names(&header);
        assert_eq!(names, vec!["amount", "col_1", "amount_1"]);
    }

    #[test]
    fn test_empty_sheet_yields_empty_frame() {
        let df = rows_to_dataframe(&[]).unwrap();
        assert!(df.is_empty());
    }

    #[test]
    fn test_bool_mixed_with_numbers_degrades() {
        assert_eq!(merge_type(ColType::Bool, &Data::Int(1)), ColType::Text);
        assert_eq!(merge_type(ColType::Int, &Data::Bool(true)), ColType::Text);
        assert_eq!(merge_type(ColType::Unknown, &Data::Bool(true)), ColType::Bool);
    }
}
