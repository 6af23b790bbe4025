use std::collections::BTreeMap;
use std::path::PathBuf;

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
pub use salescope_learning::{FeatureScore, Metrics};

/// Business entity a dataset was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Sales,
    Customers,
    Users,
    Products,
    Unknown,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Sales => "sales",
            Entity::Customers => "customers",
            Entity::Users => "users",
            Entity::Products => "products",
            Entity::Unknown => "unknown",
        }
    }

    /// Parse an explicit entity label, e.g. from source configuration.
    pub fn from_label(label: &str) -> Option<Entity> {
        match label.trim().to_ascii_lowercase().as_str() {
            "sales" => Some(Entity::Sales),
            "customers" => Some(Entity::Customers),
            "users" => Some(Entity::Users),
            "products" => Some(Entity::Products),
            "unknown" => Some(Entity::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a dataset came from, recorded in the `source` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Db,
    File,
    Api,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Db => "db",
            Provenance::File => "file",
            Provenance::Api => "api",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully read dataset, tagged with its classification and origin.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub df: DataFrame,
    pub entity: Entity,
    pub provenance: Provenance,
    /// Human-readable source label, e.g. a file path, table name or URL.
    pub source: String,
}

impl Dataset {
    pub fn new(
        df: DataFrame,
        entity: Entity,
        provenance: Provenance,
        source: impl Into<String>,
    ) -> Self {
        Self {
            df,
            entity,
            provenance,
            source: source.into(),
        }
    }
}

// ============================================================================
// Run Summary Types
// ============================================================================

/// What the cleaning stage did to the merged sales table.
///
/// Duplicates are reported, not removed; downstream consumers decide what
/// to do with them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleaningStats {
    pub rows_before: usize,
    pub rows_after: usize,
    /// Rows minus distinct rows, measured after column pruning.
    pub duplicates: usize,
    /// Columns dropped for exceeding the missing-share threshold.
    pub dropped_columns: Vec<String>,
    /// Null counts for the key columns that exist, measured after coercion.
    pub missing: BTreeMap<String, usize>,
}

/// Metrics portion of the model training stage outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MlReport {
    /// Derived classification target name, when that task ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Metrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regression: Option<Metrics>,
    /// Set when the whole stage was skipped, with the reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

/// A source that failed to read and was left out of the run.
#[derive(Debug, Serialize)]
pub struct SkippedSource {
    pub source: String,
    pub error: PipelineError,
}

/// Files the run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Artifacts {
    /// Report tables written as CSV.
    pub tables: Vec<PathBuf>,
    /// Saved model files.
    pub models: Vec<PathBuf>,
    /// Parquet exports of the raw and cleaned tables.
    pub parquet: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_manifest: Option<PathBuf>,
}

/// Summary of a full pipeline run.
///
/// Serialized to `run_summary.json` in the output directory and echoed to
/// the log at the end of the run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// Total execution time in milliseconds.
    pub duration_ms: u64,

    /// Number of sources that produced data.
    pub sources_loaded: usize,
    /// Sources that failed with a classified read error.
    pub skipped_sources: Vec<SkippedSource>,

    /// Merged sales rows before cleaning.
    pub raw_rows: usize,
    /// Sales rows after cleaning.
    pub cleaned_rows: usize,
    pub stats: CleaningStats,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ml: Option<MlReport>,

    pub artifacts: Artifacts,
}

// Summaries cross thread boundaries when the pipeline runs on a worker.
static_assertions::assert_impl_all!(RunSummary: Send);
