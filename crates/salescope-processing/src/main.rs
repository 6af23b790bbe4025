//! CLI entry point for the sales data pipeline.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::Parser;
use dotenv::dotenv;
use salescope_processing::{PipelineConfig, RunSummary, run};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Multi-source sales data pipeline",
    long_about = "Loads sales data from SQL, CSV, Excel and HTTP API sources, cleans and\n\
                  merges it, trains models and writes report tables.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  DATABASE_URL    Default DSN for SQL sources and the database export\n\n\
                  EXAMPLES:\n  \
                  # Run with the default configuration file\n  \
                  salescope\n\n  \
                  # Point at a different configuration and report directory\n  \
                  salescope -c configs/prod.toml -o out/reports\n\n  \
                  # Skip model training\n  \
                  salescope --no-ml\n\n  \
                  # Machine-readable summary only\n  \
                  salescope --json | jq .cleaned_rows"
)]
struct Args {
    /// Path to the TOML configuration file
    ///
    /// A missing file is not an error; the pipeline then runs on built-in
    /// defaults, which fall back to the conventional files under data/raw/.
    #[arg(short, long, default_value = "config/salescope.toml")]
    config: String,

    /// Output directory for report tables (overrides the configuration)
    #[arg(short, long)]
    output: Option<String>,

    /// Disable model training for this run
    #[arg(long)]
    no_ml: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show warnings and errors)
    #[arg(short, long)]
    quiet: bool,

    /// Output the run summary as JSON to stdout instead of the
    /// human-readable text
    ///
    /// Disables all progress logs; only outputs the final JSON.
    /// Useful for piping to other tools: `salescope --json | jq .duration_ms`
    #[arg(long)]
    json: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled so stdout
/// only carries the JSON summary.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    // Load environment variables from .env file
    dotenv().ok();

    let config_path = Path::new(&args.config);
    let mut config = if config_path.exists() {
        info!("Loading configuration from: {}", args.config);
        PipelineConfig::from_path(config_path)?
    } else {
        warn!(
            "Configuration file {} not found, running on defaults",
            args.config
        );
        PipelineConfig::default()
    };

    if let Some(ref output) = args.output {
        config.reporting.output_dir = PathBuf::from(output);
    }
    if args.no_ml {
        config.ml.enabled = false;
    }

    let summary = match run(&config) {
        Ok(summary) => summary,
        Err(e) => {
            error!("Pipeline failed: {}", e);
            return Err(anyhow!("Pipeline failed: {}", e));
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    print_summary(&summary);

    Ok(())
}

/// Print a human-readable summary of the run.
///
/// Note: this uses `println!` intentionally for user-facing CLI output.
/// Unlike logging it should stay visible regardless of log level settings.
fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "=".repeat(80));
    println!("PIPELINE RUN COMPLETE");
    println!("{}", "=".repeat(80));
    println!();

    println!("Duration: {}ms", summary.duration_ms);
    println!(
        "Sources: {} loaded, {} skipped",
        summary.sources_loaded,
        summary.skipped_sources.len()
    );
    for skipped in &summary.skipped_sources {
        println!("  ! {}: {}", skipped.source, skipped.error);
    }
    println!(
        "Rows: {} raw -> {} cleaned ({} duplicate(s) flagged)",
        summary.raw_rows, summary.cleaned_rows, summary.stats.duplicates
    );
    if !summary.stats.dropped_columns.is_empty() {
        println!("Dropped columns: {:?}", summary.stats.dropped_columns);
    }
    println!();

    if let Some(ref ml) = summary.ml {
        println!("Model Training:");
        if let Some(ref reason) = ml.skipped_reason {
            println!("  Skipped: {}", reason);
        }
        if let Some(ref target) = ml.target_column {
            println!("  Target: {}", target);
        }
        if let Some(ref metrics) = ml.classification {
            println!(
                "  Classification: accuracy {:.3}, f1 {:.3}, roc auc {:.3}",
                metrics.accuracy.unwrap_or(f64::NAN),
                metrics.f1.unwrap_or(f64::NAN),
                metrics.roc_auc.unwrap_or(f64::NAN)
            );
        }
        if let Some(ref metrics) = ml.regression {
            println!(
                "  Regression: rmse {:.3}, mae {:.3}, r2 {:.3}",
                metrics.rmse.unwrap_or(f64::NAN),
                metrics.mae.unwrap_or(f64::NAN),
                metrics.r2.unwrap_or(f64::NAN)
            );
        }
        println!();
    }

    let artifacts = &summary.artifacts;
    println!(
        "Artifacts: {} table(s), {} model(s), {} parquet file(s)",
        artifacts.tables.len(),
        artifacts.models.len(),
        artifacts.parquet.len()
    );
    for path in artifacts
        .tables
        .iter()
        .chain(&artifacts.models)
        .chain(&artifacts.parquet)
    {
        println!("  - {}", path.display());
    }
    if let Some(ref manifest) = artifacts.email_manifest {
        println!("  - {}", manifest.display());
    }
    println!();

    println!("Use --json for machine-readable output");
    println!("{}", "=".repeat(80));
}
