//! Stage 2: sum the measure per (UTC day, department) over the whole clean
//! tier and persist one CSV partition object per point.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use demandcast_bucket::BucketStore;
use polars::prelude::*;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{EtlError, Result};
use crate::records::{
    decode_ndjson, AggregatedPoint, JsonRecord, DEPARTMENT_FIELD, MEASURE_FIELD, TIMESTAMP_FIELD,
};
use crate::retry::with_retry;

/// Records excluded from aggregation, by cause. Exclusion is not an error;
/// the counts surface in the stage summary for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AggregateSkips {
    pub unparseable_timestamps: usize,
    pub malformed_records: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateSummary {
    pub units: usize,
    pub failed_units: usize,
    pub records: usize,
    pub skipped_timestamps: usize,
    pub skipped_malformed: usize,
    pub points: usize,
    pub written: usize,
    pub failed_writes: usize,
}

/// Coerces the canonical timestamp field to a timezone-aware UTC instant.
/// Accepts RFC 3339, the common space/T-separated datetime forms, and bare
/// dates. Naive forms are taken as already UTC.
pub fn parse_timestamp_utc(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN).and_utc());
    }
    None
}

/// Groups the records by (UTC day, department) and sums the measure.
/// The result carries at most one point per (department, day) pair and is
/// sorted by (department, day), so output order does not depend on input
/// order.
pub fn aggregate_records(records: &[JsonRecord]) -> Result<(Vec<AggregatedPoint>, AggregateSkips)> {
    let mut skips = AggregateSkips::default();
    let mut dates: Vec<String> = Vec::with_capacity(records.len());
    let mut departments: Vec<String> = Vec::with_capacity(records.len());
    let mut measures: Vec<f64> = Vec::with_capacity(records.len());

    for record in records {
        let Some(instant) = record
            .get(TIMESTAMP_FIELD)
            .and_then(Value::as_str)
            .and_then(parse_timestamp_utc)
        else {
            skips.unparseable_timestamps += 1;
            continue;
        };
        // Verbatim label; non-string JSON values are stringified, nothing
        // else is normalized.
        let department = match record.get(DEPARTMENT_FIELD) {
            Some(Value::String(label)) => label.clone(),
            Some(Value::Null) | None => {
                skips.malformed_records += 1;
                continue;
            }
            Some(other) => other.to_string(),
        };
        let Some(measure) = record.get(MEASURE_FIELD).and_then(Value::as_f64) else {
            skips.malformed_records += 1;
            continue;
        };

        dates.push(instant.date_naive().format("%Y-%m-%d").to_string());
        departments.push(department);
        measures.push(measure);
    }

    if dates.is_empty() {
        return Ok((Vec::new(), skips));
    }

    let df = DataFrame::new(vec![
        Series::new("date".into(), dates).into(),
        Series::new("department".into(), departments).into(),
        Series::new(MEASURE_FIELD.into(), measures).into(),
    ])?;

    let grouped = df
        .lazy()
        .group_by([col("date"), col("department")])
        .agg([col(MEASURE_FIELD).sum().alias("total_sales")])
        .sort(["department", "date"], Default::default())
        .collect()?;

    let date_col = grouped.column("date")?.str()?;
    let dept_col = grouped.column("department")?.str()?;
    let total_col = grouped.column("total_sales")?.f64()?;

    let mut points = Vec::with_capacity(grouped.height());
    for idx in 0..grouped.height() {
        let (Some(date), Some(department), Some(total)) =
            (date_col.get(idx), dept_col.get(idx), total_col.get(idx))
        else {
            continue;
        };
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|err| EtlError::Malformed(format!("bad grouped date: {err}")))?;
        points.push(AggregatedPoint {
            department: department.to_string(),
            date,
            total_sales: total,
        });
    }

    Ok((points, skips))
}

pub async fn run(store: &dyn BucketStore, config: &PipelineConfig) -> Result<AggregateSummary> {
    config.validate()?;

    let keys = store
        .list_objects(&config.clean_prefix)
        .await
        .map_err(|err| {
            EtlError::Structural(format!("listing {} failed: {err}", config.clean_prefix))
        })?;
    let keys: Vec<String> = keys
        .into_iter()
        .filter(|key| key.ends_with(".json"))
        .collect();

    if keys.is_empty() {
        info!(prefix = %config.clean_prefix, "no clean units found; nothing to aggregate");
        return Ok(AggregateSummary::default());
    }

    let mut summary = AggregateSummary {
        units: keys.len(),
        ..Default::default()
    };

    let mut records: Vec<JsonRecord> = Vec::new();
    for key in &keys {
        let body = match with_retry(&config.retry, "get_clean_unit", || store.get_object(key))
            .await
        {
            Ok(body) => body,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to read clean unit; skipping");
                summary.failed_units += 1;
                continue;
            }
        };
        match decode_ndjson(&body) {
            Ok(mut unit_records) => records.append(&mut unit_records),
            Err(err) => {
                warn!(key = %key, error = %err, "malformed clean unit; skipping");
                summary.failed_units += 1;
            }
        }
    }
    summary.records = records.len();

    let (points, skips) = aggregate_records(&records)?;
    summary.skipped_timestamps = skips.unparseable_timestamps;
    summary.skipped_malformed = skips.malformed_records;
    summary.points = points.len();

    for point in &points {
        let key = partition_key(&config.aggregated_prefix, point);
        let body = Bytes::from(point.to_csv_bytes()?);
        match with_retry(&config.retry, "put_partition", || {
            store.put_object(&key, body.clone(), "text/csv")
        })
        .await
        {
            Ok(()) => summary.written += 1,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to write aggregated partition");
                summary.failed_writes += 1;
            }
        }
    }

    if !points.is_empty() && summary.written == 0 {
        return Err(EtlError::Structural(format!(
            "none of {} aggregated partitions could be written",
            points.len()
        )));
    }

    info!(
        units = summary.units,
        failed_units = summary.failed_units,
        records = summary.records,
        skipped_timestamps = summary.skipped_timestamps,
        skipped_malformed = summary.skipped_malformed,
        points = summary.points,
        written = summary.written,
        failed_writes = summary.failed_writes,
        "aggregate stage complete"
    );
    Ok(summary)
}

fn partition_key(prefix: &str, point: &AggregatedPoint) -> String {
    format!(
        "{prefix}{}/{}.csv",
        point.department.replace(' ', "_"),
        point.date.format("%Y-%m-%d")
    )
}
