//! CSV source reader.

use std::path::Path;

use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use tracing::info;

use crate::error::{PipelineError, Result};

/// Read a CSV file fully into memory, first row as header.
///
/// A missing path is `NotFound`; anything the parser rejects is `Decode`.
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(PipelineError::NotFound(path.display().to_string()));
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(|e| PipelineError::Decode(format!("{}: {e}", path.display())))?
        .finish()
        .map_err(|e| PipelineError::Decode(format!("{}: {e}", path.display())))?;

    info!(
        "Read {} rows x {} columns from {}",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.csv");
        std::fs::write(&path, "order_id,amount\n1,10.5\n2,20.0\n").unwrap();

        let df = read_csv(&path).unwrap();
        assert_eq!(df.shape(), (2, 2));
        assert_eq!(df.get_column_names()[0].as_str(), "order_id");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = read_csv(Path::new("no/such/file.csv")).unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_empty_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        std::fs::write(&path, "").unwrap();

        let err = read_csv(&path).unwrap_err();
        assert_eq!(err.error_code(), "DECODE_ERROR");
    }
}
