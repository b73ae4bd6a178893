//! Batch ETL stages: clean -> aggregate -> build forecast series.

pub mod aggregator;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod records;
pub mod retry;
pub mod series;
