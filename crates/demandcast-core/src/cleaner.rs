//! Stage 1: normalize raw transaction units into the clean tier.
//!
//! One output unit per input unit, record order preserved. A unit that
//! cannot be read or parsed is logged, counted, and skipped; the batch
//! continues.

use bytes::Bytes;
use demandcast_bucket::BucketStore;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{EtlError, Result};
use crate::records::{JsonRecord, SESSION_ID_FIELD, SOURCE_DATE_FIELD, TIMESTAMP_FIELD};
use crate::retry::with_retry;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanSummary {
    pub units: usize,
    pub cleaned: usize,
    pub failed: usize,
    pub records: usize,
    pub rename_collisions: usize,
}

/// Normalizes every record in one raw unit: drops the session identifier and
/// renames the source date field to the canonical timestamp name. Returns
/// the records in input order plus the number of rename collisions.
///
/// Collision policy: when a record already carries the canonical field, the
/// canonical value wins and the conflicting source value is discarded. The
/// caller logs the count, so nothing is dropped without trace.
pub fn clean_records(raw: &[u8]) -> Result<(Vec<JsonRecord>, usize)> {
    let records = parse_unit(raw)?;
    let mut collisions = 0;
    let mut cleaned = Vec::with_capacity(records.len());

    for mut record in records {
        record.remove(SESSION_ID_FIELD);
        if let Some(value) = record.remove(SOURCE_DATE_FIELD) {
            if record.contains_key(TIMESTAMP_FIELD) {
                collisions += 1;
            } else {
                record.insert(TIMESTAMP_FIELD.to_string(), value);
            }
        }
        cleaned.push(record);
    }

    Ok((cleaned, collisions))
}

/// Raw units arrive as a JSON array of objects, a single object, or
/// newline-delimited objects with each line independently parseable.
fn parse_unit(raw: &[u8]) -> Result<Vec<JsonRecord>> {
    if let Ok(value) = serde_json::from_slice::<Value>(raw) {
        return match value {
            Value::Array(items) => items.into_iter().map(as_object).collect(),
            Value::Object(map) => Ok(vec![map]),
            other => Err(EtlError::Malformed(format!(
                "expected JSON object(s), found {other}"
            ))),
        };
    }

    let text = std::str::from_utf8(raw)
        .map_err(|_| EtlError::Malformed("unit is not valid UTF-8".to_string()))?;
    let mut records = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        records.push(as_object(serde_json::from_str(line)?)?);
    }

    if records.is_empty() {
        return Err(EtlError::Malformed("unit contains no records".to_string()));
    }
    Ok(records)
}

fn as_object(value: Value) -> Result<JsonRecord> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(EtlError::Malformed(format!(
            "expected a JSON object, found {other}"
        ))),
    }
}

pub async fn run(store: &dyn BucketStore, config: &PipelineConfig) -> Result<CleanSummary> {
    config.validate()?;

    let keys = store
        .list_objects(&config.raw_prefix)
        .await
        .map_err(|err| {
            EtlError::Structural(format!("listing {} failed: {err}", config.raw_prefix))
        })?;
    let keys: Vec<String> = keys
        .into_iter()
        .filter(|key| key.ends_with(".json"))
        .collect();

    if keys.is_empty() {
        info!(prefix = %config.raw_prefix, "no raw units found; nothing to clean");
        return Ok(CleanSummary::default());
    }

    let mut summary = CleanSummary {
        units: keys.len(),
        ..Default::default()
    };
    let mut attempted_writes = 0usize;

    for key in &keys {
        let body = match with_retry(&config.retry, "get_raw_unit", || store.get_object(key)).await
        {
            Ok(body) => body,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to read raw unit; skipping");
                summary.failed += 1;
                continue;
            }
        };

        let (records, collisions) = match clean_records(&body) {
            Ok(result) => result,
            Err(err) => {
                warn!(key = %key, error = %err, "malformed raw unit; skipping");
                summary.failed += 1;
                continue;
            }
        };

        if collisions > 0 {
            warn!(
                key = %key,
                collisions,
                "records already carried a timestamp field; conflicting sales_date values dropped"
            );
        }

        let output = encode_ndjson(&records)?;
        let clean_key = output_key(key, &config.raw_prefix, &config.clean_prefix);
        attempted_writes += 1;

        match with_retry(&config.retry, "put_clean_unit", || {
            store.put_object(&clean_key, output.clone(), "application/json")
        })
        .await
        {
            Ok(()) => {
                summary.cleaned += 1;
                summary.records += records.len();
                summary.rename_collisions += collisions;
            }
            Err(err) => {
                warn!(key = %clean_key, error = %err, "failed to write clean unit");
                summary.failed += 1;
            }
        }
    }

    if attempted_writes > 0 && summary.cleaned == 0 {
        return Err(EtlError::Structural(format!(
            "none of {attempted_writes} clean units could be written"
        )));
    }

    info!(
        units = summary.units,
        cleaned = summary.cleaned,
        failed = summary.failed,
        records = summary.records,
        rename_collisions = summary.rename_collisions,
        "clean stage complete"
    );
    Ok(summary)
}

fn output_key(key: &str, raw_prefix: &str, clean_prefix: &str) -> String {
    match key.strip_prefix(raw_prefix) {
        Some(rest) => format!("{clean_prefix}{rest}"),
        None => format!("{clean_prefix}{key}"),
    }
}

fn encode_ndjson(records: &[JsonRecord]) -> Result<Bytes> {
    let mut lines = Vec::with_capacity(records.len());
    for record in records {
        lines.push(serde_json::to_string(record)?);
    }
    Ok(Bytes::from(lines.join("\n")))
}
