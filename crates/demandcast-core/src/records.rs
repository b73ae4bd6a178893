//! Record shapes shared across the pipeline stages.
//!
//! Raw and clean records stay open-shaped (`serde_json::Map`) because the
//! cleaner must pass incidental fields through untouched; only the
//! aggregated and forecast tiers have closed schemas.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EtlError, Result};

/// Incidental field stripped by the cleaner.
pub const SESSION_ID_FIELD: &str = "session_id";
/// Source name of the event-date field on raw records.
pub const SOURCE_DATE_FIELD: &str = "sales_date";
/// Canonical timestamp field every downstream stage reads.
pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const DEPARTMENT_FIELD: &str = "department";
pub const MEASURE_FIELD: &str = "price_numeric";

/// Column order of an aggregated partition CSV.
pub const PARTITION_COLUMNS: [&str; 3] = ["date", "department", "total_sales"];

/// One raw or cleaned transaction record.
pub type JsonRecord = Map<String, Value>;

/// One (department, UTC day, summed measure) triple.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPoint {
    pub department: String,
    pub date: NaiveDate,
    pub total_sales: f64,
}

impl AggregatedPoint {
    /// Serializes the point as a one-row CSV partition object.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(PARTITION_COLUMNS)?;
        // f64 Display is shortest round-trip, so the total survives the
        // text format losslessly.
        writer.write_record([
            self.date.format("%Y-%m-%d").to_string(),
            self.department.clone(),
            self.total_sales.to_string(),
        ])?;
        writer
            .into_inner()
            .map_err(|err| EtlError::Structural(format!("flushing csv buffer failed: {err}")))
    }

    /// Parses a partition object. Accepts any number of rows so partitions
    /// may be compacted without changing the read side.
    pub fn from_csv_bytes(raw: &[u8]) -> Result<Vec<Self>> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(raw);
        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|header| header == name)
                .ok_or_else(|| EtlError::Malformed(format!("partition is missing column {name}")))
        };
        let date_idx = column(PARTITION_COLUMNS[0])?;
        let department_idx = column(PARTITION_COLUMNS[1])?;
        let total_idx = column(PARTITION_COLUMNS[2])?;

        let mut points = Vec::new();
        for row in reader.records() {
            let row = row?;
            let field = |idx: usize| {
                row.get(idx)
                    .ok_or_else(|| EtlError::Malformed("partition row is too short".to_string()))
            };
            let date = NaiveDate::parse_from_str(field(date_idx)?, "%Y-%m-%d")
                .map_err(|err| EtlError::Malformed(format!("bad partition date: {err}")))?;
            let department = field(department_idx)?.to_string();
            let total_sales = field(total_idx)?
                .parse::<f64>()
                .map_err(|err| EtlError::Malformed(format!("bad partition total: {err}")))?;
            points.push(AggregatedPoint {
                department,
                date,
                total_sales,
            });
        }
        Ok(points)
    }
}

/// One series in the forecaster's input format. Key order in the serialized
/// JSON follows declaration order, which keeps output byte-stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub start: String,
    pub cat: Vec<String>,
    pub target: Vec<f64>,
}

/// Parses a newline-delimited unit of JSON records.
pub fn decode_ndjson(raw: &[u8]) -> Result<Vec<JsonRecord>> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| EtlError::Malformed("unit is not valid UTF-8".to_string()))?;
    let mut records = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)?;
        match value {
            Value::Object(map) => records.push(map),
            other => {
                return Err(EtlError::Malformed(format!(
                    "expected a JSON object per line, found {other}"
                )))
            }
        }
    }
    Ok(records)
}
