//! salescope-processing: Multi-source sales ingestion and reporting pipeline.
//!
//! This crate pulls sales data out of SQL databases, CSV and Excel files and
//! JSON HTTP APIs, reconciles it into one Polars table, and runs the table
//! through cleaning, model training, report generation and persistence. The
//! whole run is driven by a single TOML configuration file.
//!
//! # Overview
//!
//! A run walks through six stages:
//!
//! - **Load**: read every configured source, classify what each one holds
//!   (sales, customers, users, products) and merge the sales-like frames,
//!   stamping each row with its provenance
//! - **Clean**: coerce the well-known columns to stable dtypes and drop
//!   columns that are mostly missing
//! - **Train**: derive calendar, provenance and customer-history features,
//!   then fit a high-value classifier and an amount regressor from
//!   [`salescope-learning`](salescope_learning)
//! - **Report**: write per-source aggregates, overall metrics, descriptive
//!   stats and model tables as CSV
//! - **Email**: assemble a JSON manifest for an external mail sender
//! - **Persist**: parquet snapshots of the raw and cleaned tables, plus an
//!   optional relational export
//!
//! Recoverable source failures skip the source and are reported in the run
//! summary; a failed model task never takes down the run.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::path::Path;
//!
//! use salescope_processing::{PipelineConfig, run};
//!
//! let config = PipelineConfig::from_path(Path::new("config/salescope.toml"))?;
//! let summary = run(&config)?;
//! println!("{} rows cleaned", summary.cleaned_rows);
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, PipelineError>`](Result). Read
//! errors carry a source-classification ([`PipelineError::is_recoverable`])
//! that decides whether a failing source is skipped or aborts the run.

pub mod aggregate;
pub mod classify;
pub mod cleaning;
pub mod config;
pub mod email;
pub mod error;
pub mod features;
pub mod ml;
pub mod persist;
pub mod readers;
pub mod reporting;
pub mod runner;
pub mod types;
pub mod utils;

// Re-exports for convenient access
pub use aggregate::{LoadOutcome, PROVENANCE_COLUMN, load_sources};
pub use classify::{classify, with_api_fallback};
pub use cleaning::{KEY_COLUMNS, clean};
pub use config::{
    ApiSource, ClassificationConfig, CleaningConfig, ConfigValidationError, CsvSource, EmailConfig,
    ExcelSource, MlConfig, PaginationConfig, PersistenceConfig, PipelineConfig, RegressionConfig,
    ReportingConfig, SourcesConfig, SqlSource, resolve_dsn,
};
pub use email::{EmailManifest, build_manifest, write_manifest};
pub use error::{PipelineError, Result, ResultExt};
pub use features::{ID_COLUMNS, build_features, classification_target, select_numeric_features};
pub use ml::{MlOutcome, run_ml};
pub use persist::{write_parquet, write_table};
pub use readers::{read_api, read_csv, read_excel, read_sql};
pub use reporting::{aggregates_by_source, basic_stats, overall_metrics, run_reporting};
pub use runner::run;
pub use types::{
    Artifacts, CleaningStats, Dataset, Entity, FeatureScore, Metrics, MlReport, Provenance,
    RunSummary, SkippedSource,
};
pub use utils::{
    clean_numeric_string, is_datetime_dtype, is_missing_marker, is_numeric_dtype,
    parse_numeric_string, quantile_linear, shorten_sql,
};
