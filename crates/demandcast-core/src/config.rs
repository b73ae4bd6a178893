use crate::error::{EtlError, Result};
use crate::retry::RetryPolicy;

/// Locations of the four artifact tiers plus the train/eval split knob.
/// Always passed explicitly; the core never reads environment state.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub raw_prefix: String,
    pub clean_prefix: String,
    pub aggregated_prefix: String,
    pub train_prefix: String,
    pub eval_prefix: String,
    /// Number of most-recent observed days withheld from the training target.
    pub forecast_horizon: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_prefix: "raw/".to_string(),
            clean_prefix: "clean/".to_string(),
            aggregated_prefix: "aggregated/".to_string(),
            train_prefix: "deepar/train/".to_string(),
            eval_prefix: "deepar/test/".to_string(),
            forecast_horizon: 7,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.forecast_horizon == 0 {
            return Err(EtlError::Config(
                "forecast_horizon must be at least 1".to_string(),
            ));
        }
        for (name, prefix) in [
            ("raw_prefix", &self.raw_prefix),
            ("clean_prefix", &self.clean_prefix),
            ("aggregated_prefix", &self.aggregated_prefix),
            ("train_prefix", &self.train_prefix),
            ("eval_prefix", &self.eval_prefix),
        ] {
            if prefix.is_empty() {
                return Err(EtlError::Config(format!("{name} cannot be empty")));
            }
        }
        Ok(())
    }
}
