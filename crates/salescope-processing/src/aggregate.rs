//! Source aggregation: load every configured source, classify it and merge
//! the results into the frames the rest of the pipeline works on.
//!
//! Sources are read in the fixed order SQL, CSV, Excel, API. Recoverable
//! read failures skip the source and are reported in the run summary;
//! anything else aborts the run.

use std::path::Path;

use polars::functions::concat_df_diagonal;
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::classify::{classify, with_api_fallback};
use crate::config::PipelineConfig;
use crate::error::{Result, ResultExt};
use crate::readers::{read_api, read_csv, read_excel, read_sql};
use crate::types::{Dataset, Entity, Provenance, SkippedSource};

/// Name of the provenance column stamped on every loaded frame.
pub const PROVENANCE_COLUMN: &str = "source";

const FALLBACK_SALES_CSV: &str = "data/raw/sales.csv";
const FALLBACK_CUSTOMERS_CSV: &str = "data/raw/customers.csv";
const FALLBACK_SALES_XLSX: &str = "data/raw/sales.xlsx";
const FALLBACK_EXCEL_SHEET: &str = "Sheet1";

/// Everything the load stage hands to the rest of the pipeline.
#[derive(Debug)]
pub struct LoadOutcome {
    /// Sales and customer rows from all sources, diagonally concatenated.
    pub sales: DataFrame,
    pub users: Option<DataFrame>,
    pub products: Option<DataFrame>,
    /// Number of sources that contributed rows to any bucket.
    pub sources_loaded: usize,
    pub skipped: Vec<SkippedSource>,
}

#[derive(Default)]
struct Buckets {
    sales_parts: Vec<DataFrame>,
    users: Option<DataFrame>,
    products: Option<DataFrame>,
}

impl Buckets {
    /// Route a classified dataset into its bucket; an unrecognized dataset
    /// is handed back so the caller can decide.
    fn route(&mut self, dataset: Dataset) -> Result<Option<Dataset>> {
        match dataset.entity {
            Entity::Sales | Entity::Customers => self
                .sales_parts
                .push(stamp_provenance(dataset.df, dataset.provenance)?),
            Entity::Users => self.users = Some(stamp_provenance(dataset.df, dataset.provenance)?),
            Entity::Products => {
                self.products = Some(stamp_provenance(dataset.df, dataset.provenance)?)
            }
            Entity::Unknown => return Ok(Some(dataset)),
        }
        Ok(None)
    }
}

/// Load and merge all configured sources.
///
/// Sales and customer data is concatenated into one sales frame; users and
/// products keep the last loaded frame each. When nothing lands in the sales
/// bucket, the conventional files under `data/raw/` are tried as a fallback.
pub fn load_sources(config: &PipelineConfig) -> Result<LoadOutcome> {
    let mut buckets = Buckets::default();
    let mut skipped: Vec<SkippedSource> = Vec::new();
    let mut sources_loaded = 0usize;

    for source in &config.sources.sql {
        let Some(df) = try_load(&source.name, "sql", &mut skipped, || read_sql(source))? else {
            continue;
        };
        let entity = classify_frame(&source.name, &df, source.target.as_deref());
        let dataset = Dataset::new(df, entity, Provenance::Db, source.name.clone());
        if let Some(dataset) = buckets.route(dataset)? {
            info!(
                "Sql source '{}' has no recognized entity, routed to sales",
                dataset.source
            );
            buckets
                .sales_parts
                .push(stamp_provenance(dataset.df, dataset.provenance)?);
        }
        sources_loaded += 1;
    }

    for source in &config.sources.csv {
        if source.path.as_os_str().is_empty() {
            debug!("Csv source '{}' has no path, skipping", source.name);
            continue;
        }
        let Some(df) = try_load(&source.name, "csv", &mut skipped, || read_csv(&source.path))?
        else {
            continue;
        };
        let entity = classify_frame(&source.name, &df, source.target.as_deref());
        let dataset = Dataset::new(df, entity, Provenance::File, source.name.clone());
        match buckets.route(dataset)? {
            Some(dataset) => {
                debug!(
                    "Csv source '{}' has no recognized entity, dropped",
                    dataset.source
                )
            }
            None => sources_loaded += 1,
        }
    }

    for source in &config.sources.excel {
        if source.path.as_os_str().is_empty() {
            debug!("Excel source '{}' has no path, skipping", source.name);
            continue;
        }
        let Some(df) = try_load(&source.name, "excel", &mut skipped, || {
            read_excel(&source.path, source.sheet.as_deref())
        })?
        else {
            continue;
        };
        let entity = classify_frame(&source.name, &df, source.target.as_deref());
        let dataset = Dataset::new(df, entity, Provenance::File, source.name.clone());
        match buckets.route(dataset)? {
            Some(dataset) => {
                debug!(
                    "Excel source '{}' has no recognized entity, dropped",
                    dataset.source
                )
            }
            None => sources_loaded += 1,
        }
    }

    for source in &config.sources.api {
        let Some(df) = try_load(&source.name, "api", &mut skipped, || read_api(source))? else {
            continue;
        };
        let entity = with_api_fallback(
            &source.name,
            classify_frame(&source.name, &df, source.target.as_deref()),
        );
        let dataset = Dataset::new(df, entity, Provenance::Api, source.name.clone());
        match buckets.route(dataset)? {
            Some(dataset) => {
                debug!(
                    "Api source '{}' has no recognized entity, dropped",
                    dataset.source
                )
            }
            None => sources_loaded += 1,
        }
    }

    if buckets.sales_parts.is_empty() {
        info!("No sales sources loaded, trying fallback files");
        for df in load_fallback_sales(Path::new(".")) {
            buckets
                .sales_parts
                .push(stamp_provenance(df, Provenance::File)?);
            sources_loaded += 1;
        }
    }

    let sales = if buckets.sales_parts.is_empty() {
        warn!("No sales data loaded from any source");
        DataFrame::empty()
    } else {
        concat_df_diagonal(&buckets.sales_parts).context("While merging sales frames")?
    };
    info!(
        "Merged {} sales rows from {} part(s), users: {}, products: {}",
        sales.height(),
        buckets.sales_parts.len(),
        buckets.users.is_some(),
        buckets.products.is_some()
    );

    Ok(LoadOutcome {
        sales,
        users: buckets.users,
        products: buckets.products,
        sources_loaded,
        skipped,
    })
}

/// Run one reader, separating recoverable skips from hard failures.
///
/// Returns `None` for a skipped or empty source; recoverable errors land in
/// `skipped`, everything else propagates.
fn try_load<F>(
    name: &str,
    kind: &str,
    skipped: &mut Vec<SkippedSource>,
    load: F,
) -> Result<Option<DataFrame>>
where
    F: FnOnce() -> Result<DataFrame>,
{
    match load() {
        Ok(df) if df.height() == 0 => {
            warn!("{} source '{}' returned no rows", kind, name);
            Ok(None)
        }
        Ok(df) => Ok(Some(df)),
        Err(e) if e.is_recoverable() => {
            warn!("{} source '{}' skipped: {}", kind, name, e);
            skipped.push(SkippedSource {
                source: name.to_string(),
                error: e,
            });
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn classify_frame(name: &str, df: &DataFrame, explicit_target: Option<&str>) -> Entity {
    let columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    classify(name, &columns, explicit_target)
}

/// Stamp the provenance label into the `source` column.
///
/// The column is created when absent; when the frame already carries one,
/// only its nulls are filled so upstream labels survive merging.
fn stamp_provenance(mut df: DataFrame, provenance: Provenance) -> Result<DataFrame> {
    if df.height() == 0 {
        return Ok(df);
    }
    let label = provenance.as_str();
    match df.column(PROVENANCE_COLUMN) {
        Ok(col) => {
            let as_text = col.cast(&DataType::String)?;
            let str_series = as_text.str()?;
            let mut filled: Vec<Option<String>> = Vec::with_capacity(str_series.len());
            for opt_val in str_series.into_iter() {
                filled.push(Some(opt_val.unwrap_or(label).to_string()));
            }
            df.replace(
                PROVENANCE_COLUMN,
                Series::new(PROVENANCE_COLUMN.into(), filled),
            )?;
        }
        Err(_) => {
            let values = vec![label; df.height()];
            df.with_column(Series::new(PROVENANCE_COLUMN.into(), values))?;
        }
    }
    Ok(df)
}

/// Load the conventional raw files under `base` when no configured source
/// produced sales rows.
fn load_fallback_sales(base: &Path) -> Vec<DataFrame> {
    let mut parts = Vec::new();
    for rel in [FALLBACK_SALES_CSV, FALLBACK_CUSTOMERS_CSV] {
        let path = base.join(rel);
        if !path.exists() {
            continue;
        }
        match read_csv(&path) {
            Ok(df) if df.height() > 0 => parts.push(df),
            Ok(_) => {}
            Err(e) => warn!("Fallback csv {} skipped: {}", path.display(), e),
        }
    }
    let path = base.join(FALLBACK_SALES_XLSX);
    if path.exists() {
        match read_excel(&path, Some(FALLBACK_EXCEL_SHEET)) {
            Ok(df) if df.height() > 0 => parts.push(df),
            Ok(_) => {}
            Err(e) => warn!("Fallback excel {} skipped: {}", path.display(), e),
        }
    }
    parts
}

// ============================================================================
// Tests
// ============================================================================
