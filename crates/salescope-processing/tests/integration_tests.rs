//! Integration tests for the sales pipeline.
//!
//! These tests drive the aggregator and the runner end to end over fixture
//! files and a local HTTP stub.

use std::fs;
use std::io::{Read as _, Write as _};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread;

use polars::prelude::*;
use salescope_processing::{
    ApiSource, CsvSource, PaginationConfig, PipelineConfig, build_features, clean, load_sources,
    read_csv, run,
};

// ============================================================================
// Helper Functions
// ============================================================================

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// A default configuration with every output redirected into `dir`.
fn base_config(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.reporting.output_dir = dir.join("reports");
    config.ml.models_dir = dir.join("models");
    config.persistence.raw_path = dir.join("raw.parquet");
    config.persistence.cleaned_path = dir.join("cleaned.parquet");
    config
}

fn csv_source(name: &str, path: PathBuf) -> CsvSource {
    CsvSource {
        name: name.to_string(),
        path,
        target: None,
    }
}

// ============================================================================
// Full Pipeline Tests
// ============================================================================

#[test]
fn test_pipeline_end_to_end_over_csv_fixtures() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    // Names that match no synonym, so classification runs on column
    // signatures alone.
    config
        .sources
        .csv
        .push(csv_source("sales_export", fixtures_path().join("sales.csv")));
    config.sources.csv.push(csv_source(
        "crm_customers",
        fixtures_path().join("customers.csv"),
    ));

    let summary = run(&config).expect("pipeline should complete");

    // 17 sales rows (one duplicated) + 5 customer rows.
    assert_eq!(summary.sources_loaded, 2);
    assert!(summary.skipped_sources.is_empty());
    assert_eq!(summary.raw_rows, 22);
    assert_eq!(summary.cleaned_rows, 22);
    assert_eq!(summary.stats.duplicates, 1);
    assert!(summary.stats.dropped_columns.is_empty());
    // One "n/a" amount plus five customer rows without one.
    assert_eq!(summary.stats.missing.get("amount"), Some(&6));
    assert_eq!(summary.stats.missing.get("order_id"), Some(&5));

    let ml = summary.ml.as_ref().expect("ml stage should have run");
    assert_eq!(ml.target_column.as_deref(), Some("high_value_q0.80"));
    assert!(ml.classification.is_some());
    assert!(ml.regression.is_some());

    assert_eq!(summary.artifacts.tables.len(), 5);
    assert_eq!(summary.artifacts.models.len(), 2);
    assert_eq!(summary.artifacts.parquet.len(), 2);
    for path in &summary.artifacts.tables {
        assert!(path.exists(), "missing report table {}", path.display());
    }
    assert!(dir.path().join("reports/run_summary.json").exists());

    // Both fixtures are files, so the per-source aggregates collapse to one
    // group covering every row.
    let aggregates = read_csv(&dir.path().join("reports/aggregates_by_source.csv")).unwrap();
    assert_eq!(aggregates.height(), 1);
    assert_eq!(
        aggregates.column("source").unwrap().str().unwrap().get(0),
        Some("file")
    );
    assert_eq!(
        aggregates.column("rows").unwrap().i64().unwrap().get(0),
        Some(22)
    );
    let amount_sum = aggregates
        .column("amount_sum")
        .unwrap()
        .f64()
        .unwrap()
        .get(0)
        .unwrap();
    assert!((amount_sum - 2432.88).abs() < 1e-6);
}

#[test]
fn test_runner_skips_unreadable_source() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.sources.csv.push(csv_source(
        "missing_export",
        dir.path().join("no_such_file.csv"),
    ));
    config
        .sources
        .csv
        .push(csv_source("sales_export", fixtures_path().join("sales.csv")));

    let summary = run(&config).expect("one good source should carry the run");

    assert_eq!(summary.sources_loaded, 1);
    assert_eq!(summary.skipped_sources.len(), 1);
    assert_eq!(summary.skipped_sources[0].source, "missing_export");
    assert_eq!(summary.skipped_sources[0].error.error_code(), "NOT_FOUND");
    assert_eq!(summary.raw_rows, 17);
}

#[test]
fn test_run_routes_sources_by_name() {
    // Neither file's columns match a signature, so the source names alone
    // carry the classification.
    let dir = tempfile::tempdir().unwrap();
    let sales_path = dir.path().join("sales.csv");
    let customers_path = dir.path().join("customers.csv");
    fs::write(
        &sales_path,
        "amount,order_date\n\
         100.0,2024-03-01\n\
         250.5,2024-03-02\n\
         80.0,2024-03-03\n\
         120.0,2024-03-04\n\
         310.25,2024-03-05\n\
         95.0,2024-03-06\n",
    )
    .unwrap();
    fs::write(&customers_path, "id,is_vip\n1,0\n2,1\n3,0\n4,1\n").unwrap();

    let mut config = base_config(dir.path());
    config.ml.enabled = false;
    config.sources.csv.push(csv_source("sales", sales_path));
    config.sources.csv.push(csv_source("customers", customers_path));

    // Customers merge into the sales bucket, so the combined table is the
    // column union of both files.
    let outcome = load_sources(&config).expect("both sources should load");
    assert_eq!(outcome.sales.height(), 10);
    let columns: Vec<&str> = outcome
        .sales
        .get_column_names()
        .iter()
        .map(|name| name.as_str())
        .collect();
    assert!(columns.contains(&"amount"));
    assert!(columns.contains(&"is_vip"));
    let labels = outcome.sales.column("source").unwrap();
    assert!(labels.str().unwrap().into_iter().all(|v| v == Some("file")));

    let summary = run(&config).expect("pipeline should complete");
    assert_eq!(summary.sources_loaded, 2);
    assert!(summary.skipped_sources.is_empty());
    assert_eq!(summary.raw_rows, 10);
    assert_eq!(summary.cleaned_rows, 10);
    assert_eq!(summary.stats.duplicates, 0);
    // Four customer rows carry no amount or order date.
    assert_eq!(summary.stats.missing.get("amount"), Some(&4));
    assert_eq!(summary.stats.missing.get("order_date"), Some(&4));
    assert!(!summary.stats.missing.contains_key("id"));
    assert_eq!(summary.artifacts.tables.len(), 3);
}

// ============================================================================
// API Pagination Tests
// ============================================================================

const TOTAL_ORDERS: u64 = 5;

/// Serve `pages` order pages on a local socket, honoring the `limit` and
/// `skip` query parameters the way an offset-paginated JSON API would.
fn spawn_orders_stub(pages: usize) -> (String, thread::JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub listener");
    let port = listener.local_addr().expect("stub addr").port();

    let handle = thread::spawn(move || {
        let mut served = 0usize;
        for _ in 0..pages {
            let (mut stream, _) = match listener.accept() {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]);
            let skip = query_param(&request, "skip").unwrap_or(0);
            let limit = query_param(&request, "limit").unwrap_or(TOTAL_ORDERS);

            let records: Vec<String> = (skip..(skip + limit).min(TOTAL_ORDERS))
                .map(|i| {
                    format!(
                        r#"{{"order_id":{},"customer_id":{},"order_date":"2024-02-{:02}","amount":{}.0}}"#,
                        i + 1,
                        i % 3 + 1,
                        i + 1,
                        (i + 1) * 50
                    )
                })
                .collect();
            let body = format!(
                r#"{{"orders":[{}],"total":{}}}"#,
                records.join(","),
                TOTAL_ORDERS
            );
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
            served += 1;
        }
        served
    });

    (format!("http://127.0.0.1:{port}/orders"), handle)
}

fn query_param(request: &str, name: &str) -> Option<u64> {
    let line = request.lines().next()?;
    let path = line.split_whitespace().nth(1)?;
    let query = path.split_once('?')?.1;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix(&format!("{name}=")))
        .and_then(|v| v.parse().ok())
}

#[test]
fn test_aggregator_paginates_api_source() {
    // Two full pages of two records plus a short final page.
    let (url, handle) = spawn_orders_stub(3);

    let mut config = PipelineConfig::default();
    config.sources.api.push(ApiSource {
        name: "orders_api".to_string(),
        url,
        pagination: Some(PaginationConfig {
            page_limit: 2,
            response_total_key: Some("total".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    });

    let outcome = load_sources(&config).expect("api source should load");
    let served = handle.join().expect("stub thread");

    assert_eq!(served, 3);
    assert_eq!(outcome.sources_loaded, 1);
    assert_eq!(outcome.sales.height(), TOTAL_ORDERS as usize);

    // Every row carries the api provenance label.
    let sources = outcome.sales.column("source").unwrap();
    let labels = sources.str().unwrap();
    assert!(labels.into_iter().all(|v| v == Some("api")));

    let ids: Vec<Option<i64>> = outcome
        .sales
        .column("order_id")
        .unwrap()
        .i64()
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(
        ids,
        vec![Some(1), Some(2), Some(3), Some(4), Some(5)],
        "pages should concatenate in request order"
    );
}

// ============================================================================
// Stage-Level Tests
// ============================================================================

#[test]
fn test_cleaning_and_features_over_fixture() {
    let raw = read_csv(&fixtures_path().join("sales.csv")).unwrap();
    let (cleaned, stats) = clean(&raw, 0.8).unwrap();

    // Currency formatting and missing markers coerce to Float64 and null.
    let amounts = cleaned.column("amount").unwrap();
    assert_eq!(amounts.dtype(), &DataType::Float64);
    assert_eq!(amounts.f64().unwrap().get(2), Some(200.0));
    assert_eq!(amounts.null_count(), 1);
    assert!(matches!(
        cleaned.column("order_date").unwrap().dtype(),
        DataType::Datetime(_, _)
    ));
    assert_eq!(stats.duplicates, 1);

    let features = build_features(&cleaned).unwrap();
    assert!(features.column("order_id").is_err(), "id column dropped");
    // 2024-01-05 is a Friday, 2024-01-06 a Saturday.
    assert_eq!(features.column("dow").unwrap().i64().unwrap().get(0), Some(4));
    assert_eq!(
        features.column("is_weekend").unwrap().i64().unwrap().get(1),
        Some(1)
    );
    // Third row is customer 1's second order.
    assert_eq!(
        features.column("_cnt_prev").unwrap().i64().unwrap().get(2),
        Some(1)
    );
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_sample_config_parses() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/salescope.toml");
    let config = PipelineConfig::from_path(&path).expect("shipped sample config should parse");
    assert_eq!(config.sources.csv.len(), 2);
    assert!(config.ml.enabled);
    assert!(!config.email.enabled);
    assert_eq!(config.cleaning.missing_threshold, 0.8);
}
