//! Full pipeline order: clean -> aggregate -> build series.
//!
//! Each stage reads the complete current contents of its input tier and
//! overwrites its output tier wholesale, so a run is an idempotent full
//! re-derivation. Writes are at-least-once and non-atomic: an aborted run
//! may leave partial output behind, which the next successful run replaces.

use demandcast_bucket::BucketStore;
use serde::Serialize;

use crate::aggregator::{self, AggregateSummary};
use crate::cleaner::{self, CleanSummary};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::series::{self, SeriesSummary};

#[derive(Debug, Serialize)]
pub struct PipelineSummary {
    pub clean: CleanSummary,
    pub aggregate: AggregateSummary,
    pub series: SeriesSummary,
}

pub async fn run(store: &dyn BucketStore, config: &PipelineConfig) -> Result<PipelineSummary> {
    let clean = cleaner::run(store, config).await?;
    let aggregate = aggregator::run(store, config).await?;
    let series = series::run(store, config).await?;
    Ok(PipelineSummary {
        clean,
        aggregate,
        series,
    })
}
