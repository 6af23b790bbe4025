//! Custom error types for the ingestion and processing pipeline.
//!
//! This module provides a single error hierarchy using `thiserror`. Source
//! read failures are classified into a small taxonomy (`NotFound`,
//! `Configuration`, `Transport`, `Decode`, `Unclassified`) so the aggregator
//! can decide uniformly whether to skip a source, while stage failures keep
//! their own variants.
//!
//! Errors serialize as `{code, message}` structs, which is how skipped
//! sources are recorded in the run summary.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Source file or resource does not exist.
    #[error("Source not found: {0}")]
    NotFound(String),

    /// Source settings are unusable (blank DSN, blank query, bad URL).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network or database connectivity failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response or file content could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Read failure that fits none of the other read categories.
    #[error("Unclassified read error: {0}")]
    Unclassified(String),

    /// Column was not found in the dataset.
    #[error("Column '{0}' not found in dataset")]
    ColumnNotFound(String),

    /// Data cleaning failed.
    #[error("Failed to clean data: {0}")]
    CleaningFailed(String),

    /// Feature engineering failed.
    #[error("Failed to engineer features: {0}")]
    FeatureEngineeringFailed(String),

    /// Report generation failed.
    #[error("Failed to generate report: {0}")]
    ReportGenerationFailed(String),

    /// Internal error (e.g., runtime construction failure).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Model training error from the learning crate.
    #[error("Learning error: {0}")]
    Learning(#[from] salescope_learning::LearningError),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get a stable error code for summaries and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
            Self::Unclassified(_) => "UNCLASSIFIED",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::CleaningFailed(_) => "CLEANING_FAILED",
            Self::FeatureEngineeringFailed(_) => "FEATURE_ENGINEERING_FAILED",
            Self::ReportGenerationFailed(_) => "REPORT_GENERATION_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Learning(_) => "LEARNING_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error is a classified read failure.
    ///
    /// The aggregator skips sources that fail this way and carries on with
    /// the rest of the run.
    pub fn is_read_error(&self) -> bool {
        match self {
            Self::NotFound(_)
            | Self::Configuration(_)
            | Self::Transport(_)
            | Self::Decode(_)
            | Self::Unclassified(_) => true,
            Self::WithContext { source, .. } => source.is_read_error(),
            _ => false,
        }
    }

    /// Check if this error is recoverable (the run can continue without the
    /// failed piece).
    pub fn is_recoverable(&self) -> bool {
        self.is_read_error()
    }
}

/// Errors serialize as a struct with `code` and `message` fields so skipped
/// sources land in the run summary in a stable shape.
impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipelineError::Polars(e).with_context(context))
    }
}
