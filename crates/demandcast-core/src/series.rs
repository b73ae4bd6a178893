//! Stage 3: rebuild one day-ordered series per department from the
//! aggregated partitions and split it into train and eval datasets.
//!
//! Gaps between observed days are not zero-filled; the target contains one
//! entry per observed day, so a gap compresses the time axis. This is part
//! of the output contract (see DESIGN.md).

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::NaiveDate;
use demandcast_bucket::BucketStore;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{EtlError, Result};
use crate::records::{AggregatedPoint, ForecastRecord};
use crate::retry::with_retry;

#[derive(Debug, Clone, Serialize)]
pub struct SkippedDepartment {
    pub department: String,
    pub observed_days: usize,
}

#[derive(Debug, Default)]
pub struct SeriesSplit {
    pub train: Vec<ForecastRecord>,
    pub eval: Vec<ForecastRecord>,
    pub skipped: Vec<SkippedDepartment>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeriesSummary {
    pub partitions: usize,
    pub failed_partitions: usize,
    pub points: usize,
    pub train_records: usize,
    pub eval_records: usize,
    pub skipped_departments: usize,
}

/// Builds the train/eval split. Departments iterate in lexicographic order
/// and days in ascending order, so identical input yields byte-identical
/// output regardless of partition ordering.
///
/// A department with `observed days <= horizon` has no valid train prefix
/// and is excluded from both outputs; the exclusion is logged and reported.
pub fn build_series(points: &[AggregatedPoint], horizon: usize) -> SeriesSplit {
    let mut by_department: BTreeMap<&str, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for point in points {
        // Duplicate (department, day) pairs cannot occur when the input
        // honors the aggregation invariant; merge by summation if they do.
        *by_department
            .entry(point.department.as_str())
            .or_default()
            .entry(point.date)
            .or_insert(0.0) += point.total_sales;
    }

    let mut split = SeriesSplit::default();
    for (department, days) in by_department {
        if days.len() <= horizon {
            warn!(
                department,
                observed_days = days.len(),
                horizon,
                "excluding department; series too short to split"
            );
            split.skipped.push(SkippedDepartment {
                department: department.to_string(),
                observed_days: days.len(),
            });
            continue;
        }

        let Some(first_day) = days.keys().next() else {
            continue;
        };
        let start = first_day.format("%Y-%m-%d").to_string();
        let target: Vec<f64> = days.values().copied().collect();
        let train_target = target[..target.len() - horizon].to_vec();

        split.train.push(ForecastRecord {
            start: start.clone(),
            cat: vec![department.to_string()],
            target: train_target,
        });
        split.eval.push(ForecastRecord {
            start,
            cat: vec![department.to_string()],
            target,
        });
    }

    split
}

pub async fn run(store: &dyn BucketStore, config: &PipelineConfig) -> Result<SeriesSummary> {
    config.validate()?;

    let keys = store
        .list_objects(&config.aggregated_prefix)
        .await
        .map_err(|err| {
            EtlError::Structural(format!("listing {} failed: {err}", config.aggregated_prefix))
        })?;
    let keys: Vec<String> = keys
        .into_iter()
        .filter(|key| key.ends_with(".csv"))
        .collect();

    if keys.is_empty() {
        info!(prefix = %config.aggregated_prefix, "no aggregated partitions found; nothing to build");
        return Ok(SeriesSummary::default());
    }

    let mut summary = SeriesSummary {
        partitions: keys.len(),
        ..Default::default()
    };

    let mut points: Vec<AggregatedPoint> = Vec::new();
    for key in &keys {
        let body = match with_retry(&config.retry, "get_partition", || store.get_object(key))
            .await
        {
            Ok(body) => body,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to read partition; skipping");
                summary.failed_partitions += 1;
                continue;
            }
        };
        match AggregatedPoint::from_csv_bytes(&body) {
            Ok(mut rows) => points.append(&mut rows),
            Err(err) => {
                warn!(key = %key, error = %err, "malformed partition; skipping");
                summary.failed_partitions += 1;
            }
        }
    }
    summary.points = points.len();

    let split = build_series(&points, config.forecast_horizon);
    summary.train_records = split.train.len();
    summary.eval_records = split.eval.len();
    summary.skipped_departments = split.skipped.len();

    let train_key = format!("{}train.json", config.train_prefix);
    let eval_key = format!("{}test.json", config.eval_prefix);
    let train_body = encode_ndjson(&split.train)?;
    let eval_body = encode_ndjson(&split.eval)?;

    // Either dataset failing to land is fatal: the two artifacts must stay
    // in step for the consuming trainer.
    with_retry(&config.retry, "put_train_dataset", || {
        store.put_object(&train_key, train_body.clone(), "application/json")
    })
    .await
    .map_err(|err| EtlError::Structural(format!("writing {train_key} failed: {err}")))?;

    with_retry(&config.retry, "put_eval_dataset", || {
        store.put_object(&eval_key, eval_body.clone(), "application/json")
    })
    .await
    .map_err(|err| EtlError::Structural(format!("writing {eval_key} failed: {err}")))?;

    info!(
        partitions = summary.partitions,
        failed_partitions = summary.failed_partitions,
        points = summary.points,
        train_records = summary.train_records,
        eval_records = summary.eval_records,
        skipped_departments = summary.skipped_departments,
        "series stage complete"
    );
    Ok(summary)
}

fn encode_ndjson(records: &[ForecastRecord]) -> Result<Bytes> {
    let mut lines = Vec::with_capacity(records.len());
    for record in records {
        lines.push(serde_json::to_string(record)?);
    }
    Ok(Bytes::from(lines.join("\n")))
}
