//! Configuration types for the pipeline.
//!
//! The whole run is driven by one TOML document, deserialized into a typed
//! [`PipelineConfig`] and validated once at startup. Every field has a
//! documented default, so a partial file (or none at all) still yields a
//! usable configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

const DEFAULT_MISSING_THRESHOLD: f64 = 0.8;
const DEFAULT_TARGET_QUANTILE: f64 = 0.8;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PAGE_LIMIT: u64 = 100;
const DEFAULT_MAX_PAGES: u64 = 100;

/// Environment variable consulted when a SQL source has no explicit DSN.
pub const DEFAULT_DSN_ENV: &str = "DATABASE_URL";

/// Top-level configuration for a pipeline run.
///
/// Loaded from TOML via [`PipelineConfig::from_path`] and treated as frozen
/// afterwards: nothing mutates it once the run starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sources: SourcesConfig,
    pub cleaning: CleaningConfig,
    pub ml: MlConfig,
    pub reporting: ReportingConfig,
    pub email: EmailConfig,
    pub persistence: PersistenceConfig,
}

impl PipelineConfig {
    /// Load and validate a configuration file.
    ///
    /// A missing file is `NotFound`; unparseable TOML and failed validation
    /// are `Configuration` errors.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::NotFound(path.display().to_string())
            } else {
                PipelineError::Io(e)
            }
        })?;
        let config: PipelineConfig = toml::from_str(&raw).map_err(|e| {
            PipelineError::Configuration(format!("failed to parse {}: {e}", path.display()))
        })?;
        config
            .validate()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        if !(0.0..=1.0).contains(&self.cleaning.missing_threshold) {
            return Err(ConfigValidationError::InvalidThreshold {
                field: "cleaning.missing_threshold".to_string(),
                value: self.cleaning.missing_threshold,
            });
        }

        let q = self.ml.classification.threshold_q;
        if !(q > 0.0 && q < 1.0) {
            return Err(ConfigValidationError::InvalidThreshold {
                field: "ml.classification.threshold_q".to_string(),
                value: q,
            });
        }

        for api in &self.sources.api {
            if api.timeout_secs == 0 {
                return Err(ConfigValidationError::InvalidCount {
                    field: format!("sources.api[{}].timeout_secs", api.name),
                    value: api.timeout_secs,
                });
            }
            if let Some(pagination) = &api.pagination {
                if pagination.page_limit == 0 {
                    return Err(ConfigValidationError::InvalidCount {
                        field: format!("sources.api[{}].pagination.page_limit", api.name),
                        value: pagination.page_limit,
                    });
                }
                if pagination.max_pages == 0 {
                    return Err(ConfigValidationError::InvalidCount {
                        field: format!("sources.api[{}].pagination.max_pages", api.name),
                        value: pagination.max_pages,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid threshold for '{field}': {value} (must be between 0.0 and 1.0)")]
    InvalidThreshold { field: String, value: f64 },

    #[error("Invalid value for '{field}': {value} (must be at least 1)")]
    InvalidCount { field: String, value: u64 },
}

// =============================================================================
// Sources
// =============================================================================

/// All configured data sources, grouped by kind.
///
/// The aggregator reads them in the fixed order SQL, CSV, Excel, API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub sql: Vec<SqlSource>,
    pub csv: Vec<CsvSource>,
    pub excel: Vec<ExcelSource>,
    pub api: Vec<ApiSource>,
}

impl SourcesConfig {
    /// True when no source of any kind is configured.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty() && self.csv.is_empty() && self.excel.is_empty() && self.api.is_empty()
    }
}

/// One SQL query source.
///
/// The DSN comes from `dsn` if set, otherwise from the environment variable
/// named by `dsn_env` (default `DATABASE_URL`). A source whose resolved DSN
/// or query text is blank is treated as disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlSource {
    /// Label used for classification and logging.
    pub name: String,
    pub query: String,
    pub dsn: Option<String>,
    pub dsn_env: Option<String>,
    /// Explicit entity override, e.g. `"sales"`.
    pub target: Option<String>,
}

/// One CSV file source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvSource {
    pub name: String,
    pub path: PathBuf,
    pub target: Option<String>,
}

/// One Excel worksheet source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcelSource {
    pub name: String,
    pub path: PathBuf,
    /// Worksheet name; the first sheet in workbook order when unset.
    pub sheet: Option<String>,
    pub target: Option<String>,
}

/// One HTTP JSON endpoint source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSource {
    pub name: String,
    pub url: String,
    /// HTTP method. Default: "GET".
    pub method: String,
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    /// Dotted path to the record list in the response body,
    /// e.g. `"data.items"`.
    pub json_root: Option<String>,
    /// Request timeout in seconds. Default: 10.
    pub timeout_secs: u64,
    pub pagination: Option<PaginationConfig>,
    /// Optional parquet snapshot of the fetched records.
    pub save_as: Option<PathBuf>,
    pub target: Option<String>,
}

impl Default for ApiSource {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            method: "GET".to_string(),
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            json_root: None,
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            pagination: None,
            save_as: None,
            target: None,
        }
    }
}

/// Offset pagination settings for an API source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Query parameter carrying the page size. Default: "limit".
    pub limit_param: String,
    /// Query parameter carrying the record offset. Default: "skip".
    pub skip_param: String,
    /// Records requested per page. Default: 100.
    pub page_limit: u64,
    /// Hard page-count cap. Default: 100.
    pub max_pages: u64,
    /// Top-level response key holding the total record count.
    pub response_total_key: Option<String>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            limit_param: "limit".to_string(),
            skip_param: "skip".to_string(),
            page_limit: DEFAULT_PAGE_LIMIT,
            max_pages: DEFAULT_MAX_PAGES,
            response_total_key: None,
        }
    }
}

// =============================================================================
// Stages
// =============================================================================

/// Cleaning stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// Columns whose null fraction strictly exceeds this are dropped.
    /// Default: 0.8.
    pub missing_threshold: f64,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            missing_threshold: DEFAULT_MISSING_THRESHOLD,
        }
    }
}

/// ML stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MlConfig {
    /// Master switch for the whole stage. Default: true.
    pub enabled: bool,
    /// Directory for saved model files. Default: "models".
    pub models_dir: PathBuf,
    pub classification: ClassificationConfig,
    pub regression: RegressionConfig,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            models_dir: PathBuf::from("models"),
            classification: ClassificationConfig::default(),
            regression: RegressionConfig::default(),
        }
    }
}

/// Classification task settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Default: true.
    pub enabled: bool,
    /// Explicit target column; when unset the target is derived from
    /// `amount` at `threshold_q`.
    pub target: Option<String>,
    /// Quantile of `amount` above which rows are labeled positive.
    /// Default: 0.8.
    pub threshold_q: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target: None,
            threshold_q: DEFAULT_TARGET_QUANTILE,
        }
    }
}

/// Regression task settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Default: true.
    pub enabled: bool,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Report artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Directory for report CSV tables. Default: "reports".
    pub output_dir: PathBuf,
    /// Currency label used in summary logs. Default: "у.е.".
    pub currency_label: String,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
            currency_label: "у.е.".to_string(),
        }
    }
}

/// Email manifest settings. Delivery itself is out of scope; the pipeline
/// only assembles the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Default: false.
    pub enabled: bool,
    pub to: Vec<String>,
    /// Default: "Pipeline report".
    pub subject: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            to: Vec::new(),
            subject: "Pipeline report".to_string(),
        }
    }
}

/// Persistence settings for the combined and cleaned tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Write the combined raw table as parquet. Default: true.
    pub save_raw: bool,
    /// Write the cleaned table as parquet. Default: true.
    pub save_cleaned: bool,
    /// Default: "data/processed/_combined_raw.parquet".
    pub raw_path: PathBuf,
    /// Default: "data/processed/cleaned.parquet".
    pub cleaned_path: PathBuf,
    /// When set (together with a resolvable DSN), the cleaned table is also
    /// written to this database table.
    pub database_table: Option<String>,
    pub dsn: Option<String>,
    pub dsn_env: Option<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_raw: true,
            save_cleaned: true,
            raw_path: PathBuf::from("data/processed/_combined_raw.parquet"),
            cleaned_path: PathBuf::from("data/processed/cleaned.parquet"),
            database_table: None,
            dsn: None,
            dsn_env: None,
        }
    }
}

/// Resolve a DSN from an explicit value or a named environment variable.
///
/// Returns an empty string when neither yields anything, which downstream
/// treats as a disabled source.
pub fn resolve_dsn(dsn: Option<&str>, dsn_env: Option<&str>) -> String {
    if let Some(dsn) = dsn {
        if !dsn.trim().is_empty() {
            return dsn.trim().to_string();
        }
    }
    let var = dsn_env.unwrap_or(DEFAULT_DSN_ENV);
    std::env::var(var).unwrap_or_default().trim().to_string()
}
