//! HTTP JSON reader with optional offset pagination.
//!
//! Records come back as a [`DataFrame`] with nested objects flattened into
//! dotted columns, the way `data.items[].address.city` style payloads are
//! usually tabulated.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use polars::prelude::*;
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ApiSource, PaginationConfig};
use crate::error::{PipelineError, Result};

/// Fetch an endpoint and tabulate the JSON records it returns.
///
/// With a pagination block the endpoint is polled page by page through the
/// configured `limit`/`skip` parameters; otherwise a single request is made.
/// When `save_as` is set the frame is also snapshotted to parquet, failures
/// there only log a warning.
pub fn read_api(source: &ApiSource) -> Result<DataFrame> {
    let client = Client::builder()
        .timeout(Duration::from_secs(source.timeout_secs))
        .build()
        .map_err(|e| {
            PipelineError::Configuration(format!(
                "api source `{}`: failed to build http client: {e}",
                source.name
            ))
        })?;

    let records = match &source.pagination {
        Some(pagination) => fetch_paginated(&client, source, pagination)?,
        None => fetch_single(&client, source)?,
    };

    let mut df = records_to_dataframe(&records)?;
    info!(
        "Read {} rows x {} columns from api source '{}'",
        df.height(),
        df.width(),
        source.name
    );

    if let Some(path) = &source.save_as {
        save_parquet_snapshot(&mut df, path);
    }

    Ok(df)
}

fn fetch_single(client: &Client, source: &ApiSource) -> Result<Vec<Value>> {
    let body = request_page(client, source, &source.params)?;
    let payload = extract_payload(&body, source.json_root.as_deref());
    Ok(extract_records(payload, true))
}

/// Poll the endpoint page by page.
///
/// The page size comes from an explicit `limit` parameter when the source
/// already carries one, otherwise from the pagination block; likewise the
/// starting offset from an explicit `skip` parameter. The loop stops on a
/// short page, on the page cap, or once the collected count reaches the
/// total advertised under `response_total_key`.
fn fetch_paginated(
    client: &Client,
    source: &ApiSource,
    pagination: &PaginationConfig,
) -> Result<Vec<Value>> {
    let limit = source
        .params
        .get(&pagination.limit_param)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(pagination.page_limit);
    let offset = source
        .params
        .get(&pagination.skip_param)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let mut records = Vec::new();
    for page in 0..pagination.max_pages {
        let mut params = source.params.clone();
        params.insert(pagination.limit_param.clone(), limit.to_string());
        params.insert(
            pagination.skip_param.clone(),
            (offset + page * limit).to_string(),
        );

        let body = request_page(client, source, &params)?;
        let payload = extract_payload(&body, source.json_root.as_deref());
        let page_records = extract_records(payload, false);
        let received = page_records.len() as u64;
        records.extend(page_records);

        if received < limit {
            debug!("Short page {} ({} records), pagination complete", page, received);
            break;
        }
        if let Some(total) = advertised_total(&body, pagination.response_total_key.as_deref()) {
            if records.len() as u64 >= total {
                debug!("Advertised total {} reached on page {}", total, page);
                break;
            }
        }
    }
    Ok(records)
}

fn request_page(
    client: &Client,
    source: &ApiSource,
    params: &BTreeMap<String, String>,
) -> Result<Value> {
    let method = source.method.to_uppercase();
    let builder = match method.as_str() {
        "GET" => client.get(&source.url),
        "POST" => client.post(&source.url),
        other => {
            return Err(PipelineError::Configuration(format!(
                "api source `{}`: unsupported method `{other}`",
                source.name
            )));
        }
    };

    let query: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let mut builder = builder.query(&query);
    for (name, value) in &source.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
        .send()
        .map_err(|e| PipelineError::Transport(format!("api source `{}`: {e}", source.name)))?;
    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::Transport(format!(
            "api source `{}`: http status {status}",
            source.name
        )));
    }

    response.json::<Value>().map_err(|e| {
        PipelineError::Decode(format!(
            "api source `{}`: invalid json body: {e}",
            source.name
        ))
    })
}

/// Descend a dotted `json_root` such as `"data.items"` into the body.
///
/// Falls back to the whole body when the path does not resolve.
fn extract_payload<'a>(body: &'a Value, json_root: Option<&str>) -> &'a Value {
    let Some(root) = json_root.filter(|r| !r.is_empty()) else {
        return body;
    };
    let mut current = body;
    for part in root.split('.') {
        match current.get(part) {
            Some(next) => current = next,
            None => {
                debug!("Json root '{}' not found, using whole body", root);
                return body;
            }
        }
    }
    current
}

/// Pull the record list out of a payload.
///
/// Arrays are taken as-is and objects yield their first array-valued member.
/// With `wrap_object` set, an object without any array member becomes a
/// single record instead of nothing.
fn extract_records(payload: &Value, wrap_object: bool) -> Vec<Value> {
    match payload {
        Value::Array(items) => items.clone(),
        Value::Object(map) => {
            for value in map.values() {
                if let Value::Array(items) = value {
                    return items.clone();
                }
            }
            if wrap_object {
                vec![payload.clone()]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

fn advertised_total(body: &Value, total_key: Option<&str>) -> Option<u64> {
    body.get(total_key?)?.as_u64()
}

/// Flatten one record into dotted columns, depth-first.
///
/// `{"a": {"b": 1}, "c": 2}` becomes `a.b = 1, c = 2`. Arrays stay intact
/// and serialize to JSON text later; a bare scalar record lands in a single
/// `value` column.
fn flatten_record(record: &Value, prefix: &str, out: &mut Vec<(String, Value)>) {
    match record {
        Value::Object(map) => {
            for (key, value) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match value {
                    Value::Object(_) => flatten_record(value, &name, out),
                    other => out.push((name, other.clone())),
                }
            }
        }
        other => {
            let name = if prefix.is_empty() { "value" } else { prefix };
            out.push((name.to_string(), other.clone()));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonColType {
    Unknown,
    Int,
    Float,
    Bool,
    Text,
}

fn merge_json_type(current: JsonColType, value: &Value) -> JsonColType {
    use JsonColType::*;

    let incoming = match value {
        Value::Null => return current,
        Value::Bool(_) => Bool,
        Value::Number(n) if n.as_i64().is_some() => Int,
        Value::Number(_) => Float,
        _ => Text,
    };
    match (current, incoming) {
        (Unknown, t) => t,
        (t, u) if t == u => t,
        (Int, Float) | (Float, Int) => Float,
        _ => Text,
    }
}

/// Tabulate flattened records, one typed series per column.
///
/// Column order follows first appearance across records; keys missing from
/// a record become nulls.
fn records_to_dataframe(records: &[Value]) -> Result<DataFrame> {
    if records.is_empty() {
        return Ok(DataFrame::empty());
    }

    let mut order: Vec<String> = Vec::new();
    let mut cells: HashMap<String, HashMap<usize, Value>> = HashMap::new();
    for (row, record) in records.iter().enumerate() {
        let mut flat = Vec::new();
        flatten_record(record, "", &mut flat);
        for (name, value) in flat {
            if !cells.contains_key(&name) {
                order.push(name.clone());
            }
            cells.entry(name).or_default().insert(row, value);
        }
    }

    let mut columns = Vec::with_capacity(order.len());
    for name in &order {
        let by_row = &cells[name];
        let values: Vec<Option<&Value>> = (0..records.len()).map(|row| by_row.get(&row)).collect();
        columns.push(build_column(name, &values));
    }
    Ok(DataFrame::new(columns)?)
}

fn build_column(name: &str, values: &[Option<&Value>]) -> Column {
    let ty = values
        .iter()
        .copied()
        .flatten()
        .fold(JsonColType::Unknown, merge_json_type);

    let series = match ty {
        JsonColType::Int => {
            let ints: Vec<Option<i64>> = values
                .iter()
                .copied()
                .map(|v| v.and_then(Value::as_i64))
                .collect();
            Series::new(name.into(), ints)
        }
        JsonColType::Float => {
            let floats: Vec<Option<f64>> = values
                .iter()
                .copied()
                .map(|v| v.and_then(Value::as_f64))
                .collect();
            Series::new(name.into(), floats)
        }
        JsonColType::Bool => {
            let bools: Vec<Option<bool>> = values
                .iter()
                .copied()
                .map(|v| v.and_then(Value::as_bool))
                .collect();
            Series::new(name.into(), bools)
        }
        JsonColType::Unknown | JsonColType::Text => {
            let texts: Vec<Option<String>> = values
                .iter()
                .copied()
                .map(|v| v.map(json_value_to_string))
                .collect();
            Series::new(name.into(), texts)
        }
    };
    Column::from(series)
}

fn json_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn save_parquet_snapshot(df: &mut DataFrame, path: &Path) {
    let result = (|| -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        ParquetWriter::new(file).finish(df)?;
        Ok(())
    })();
    match result {
        Ok(()) => info!("Api snapshot saved: {}", path.display()),
        Err(e) => warn!("Failed to save api snapshot {}: {}", path.display(), e),
    }
}

// ============================================================================
// Tests
// ============================================================================
