//! Pipeline orchestration: run every stage in order and assemble the run
//! summary.
//!
//! Stage failures are not all equal. Loading and cleaning abort the run;
//! model training degrades to a skipped report; reporting, the email
//! manifest and persistence are best-effort and only warn.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use polars::prelude::*;
use tracing::{debug, error, info, warn};

use crate::aggregate::{PROVENANCE_COLUMN, load_sources};
use crate::cleaning::{clean, coerce_to_datetime};
use crate::config::{PipelineConfig, resolve_dsn};
use crate::email::{build_manifest, write_manifest};
use crate::error::Result;
use crate::ml::{MlOutcome, run_ml};
use crate::persist::{write_parquet, write_table};
use crate::reporting::run_reporting;
use crate::types::{Artifacts, CleaningStats, MlReport, RunSummary};

/// File name of the JSON run summary written next to the report tables.
const SUMMARY_FILE: &str = "run_summary.json";

/// Execute the full pipeline described by `config`.
///
/// Stages run in a fixed order: load, clean, train, report, email,
/// persist. An empty merged sales table ends the run after the load stage
/// with a summary carrying the zero counts.
pub fn run(config: &PipelineConfig) -> Result<RunSummary> {
    let started = Instant::now();

    info!("Step 1: Loading configured sources...");
    let outcome = load_sources(config)?;
    if !outcome.skipped.is_empty() {
        warn!(
            "{} source(s) skipped after read failures",
            outcome.skipped.len()
        );
    }

    if outcome.sales.height() == 0 {
        warn!("No sales rows loaded, skipping the remaining stages");
        let summary = RunSummary {
            duration_ms: started.elapsed().as_millis() as u64,
            sources_loaded: outcome.sources_loaded,
            skipped_sources: outcome.skipped,
            raw_rows: 0,
            cleaned_rows: 0,
            stats: CleaningStats::default(),
            ml: None,
            artifacts: Artifacts::default(),
        };
        write_summary(&summary, &config.reporting.output_dir);
        return Ok(summary);
    }

    let mut raw = outcome.sales;
    log_overview(&raw, &outcome.users, &outcome.products, config);

    info!("Step 2: Cleaning the merged sales table...");
    let (mut cleaned, stats) = clean(&raw, config.cleaning.missing_threshold)?;
    info!(
        "Cleaning kept {} of {} rows, {} duplicate row(s) flagged",
        stats.rows_after, stats.rows_before, stats.duplicates
    );

    info!("Step 3: Training models...");
    let ml_outcome = match run_ml(&cleaned, &config.ml) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Model training failed: {}", e);
            MlOutcome {
                report: MlReport {
                    skipped_reason: Some(format!("training failed: {e}")),
                    ..Default::default()
                },
                ..Default::default()
            }
        }
    };

    info!("Step 4: Writing report tables...");
    let mut artifacts = run_reporting(&raw, &cleaned, &ml_outcome, &config.reporting);

    info!("Step 5: Assembling the email manifest...");
    if let Some(manifest) = build_manifest(&config.email, &artifacts) {
        artifacts.email_manifest = write_manifest(&manifest, &config.reporting.output_dir);
    }

    info!("Step 6: Persisting tables...");
    persist_tables(&mut raw, &mut cleaned, config, &mut artifacts);

    let summary = RunSummary {
        duration_ms: started.elapsed().as_millis() as u64,
        sources_loaded: outcome.sources_loaded,
        skipped_sources: outcome.skipped,
        raw_rows: raw.height(),
        cleaned_rows: cleaned.height(),
        stats,
        ml: Some(ml_outcome.report),
        artifacts,
    };
    write_summary(&summary, &config.reporting.output_dir);
    info!("Pipeline finished in {} ms", summary.duration_ms);
    Ok(summary)
}

/// Log the post-load overview: table shapes, the currency label, the
/// `order_date` span and the row distribution across sources.
fn log_overview(
    sales: &DataFrame,
    users: &Option<DataFrame>,
    products: &Option<DataFrame>,
    config: &PipelineConfig,
) {
    info!("Merged sales table shape: {:?}", sales.shape());
    if let Some(users) = users {
        info!("Users table shape: {:?}", users.shape());
    }
    if let Some(products) = products {
        info!("Products table shape: {:?}", products.shape());
    }
    info!("Amounts are reported in {}", config.reporting.currency_label);
    if let Some((first, last)) = order_date_span(sales) {
        info!("Order dates span {} to {}", first, last);
    }
    let by_source = source_distribution(sales);
    if !by_source.is_empty() {
        info!("Rows per source: {:?}", by_source);
    }
}

/// Smallest and largest `order_date`, formatted as dates. `None` when the
/// column is missing or holds nothing parseable.
fn order_date_span(sales: &DataFrame) -> Option<(String, String)> {
    let col = sales.column("order_date").ok()?;
    let parsed = coerce_to_datetime(col.as_materialized_series()).ok()?;
    let cast = parsed.cast(&DataType::Int64).ok()?;
    let stamps = cast.i64().ok()?;
    let first = chrono::DateTime::from_timestamp_millis(stamps.min()?)?;
    let last = chrono::DateTime::from_timestamp_millis(stamps.max()?)?;
    Some((
        first.format("%Y-%m-%d").to_string(),
        last.format("%Y-%m-%d").to_string(),
    ))
}

/// Row counts per `source` label, with nulls keyed as `"null"`.
fn source_distribution(sales: &DataFrame) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    let Ok(col) = sales.column(PROVENANCE_COLUMN) else {
        return counts;
    };
    let Ok(labels) = col.str() else {
        return counts;
    };
    for label in labels.into_iter() {
        *counts
            .entry(label.unwrap_or("null").to_string())
            .or_insert(0usize) += 1;
    }
    counts
}

/// Best-effort parquet and database exports, recorded in `artifacts`.
fn persist_tables(
    raw: &mut DataFrame,
    cleaned: &mut DataFrame,
    config: &PipelineConfig,
    artifacts: &mut Artifacts,
) {
    let persistence = &config.persistence;
    if persistence.save_raw {
        match write_parquet(raw, &persistence.raw_path) {
            Ok(()) => artifacts.parquet.push(persistence.raw_path.clone()),
            Err(e) => warn!("Raw parquet export failed: {}", e),
        }
    }
    if persistence.save_cleaned {
        match write_parquet(cleaned, &persistence.cleaned_path) {
            Ok(()) => artifacts.parquet.push(persistence.cleaned_path.clone()),
            Err(e) => warn!("Cleaned parquet export failed: {}", e),
        }
    }

    let Some(table) = persistence.database_table.as_deref() else {
        debug!("No database table configured, export skipped");
        return;
    };
    let dsn = resolve_dsn(persistence.dsn.as_deref(), persistence.dsn_env.as_deref());
    if dsn.is_empty() {
        warn!("Database export of {} skipped, no DSN resolved", table);
        return;
    }
    match write_table(cleaned, table, &dsn) {
        Ok(()) => info!("Cleaned table exported to database table {}", table),
        Err(e) => warn!("Database export failed: {}", e),
    }
}

/// Write the summary JSON next to the report tables, best-effort.
fn write_summary(summary: &RunSummary, dir: &Path) {
    let path = dir.join(SUMMARY_FILE);
    let result = (|| -> Result<()> {
        fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(summary)?;
        debug!("Run summary:\n{}", json);
        fs::write(&path, json)?;
        Ok(())
    })();
    match result {
        Ok(()) => info!("Run summary written to {}", path.display()),
        Err(e) => warn!("Run summary write failed: {}", e),
    }
}
