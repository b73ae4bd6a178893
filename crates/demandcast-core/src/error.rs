use demandcast_bucket::BucketError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("bucket operation failed: {0}")]
    Bucket(#[from] BucketError),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("structural failure: {0}")]
    Structural(String),
}

pub type Result<T> = std::result::Result<T, EtlError>;
