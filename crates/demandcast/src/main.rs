use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use demandcast_bucket::{S3BucketStore, S3Config};
use demandcast_core::config::PipelineConfig;
use demandcast_core::{aggregator, cleaner, pipeline, series};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Demandcast ETL: raw transactions to forecast-ready series", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize raw transaction units into the clean tier
    Clean,
    /// Sum clean records into per-department daily totals
    Aggregate,
    /// Build the train/test forecast datasets from aggregated partitions
    BuildSeries,
    /// Run all three stages in pipeline order
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let store = connect_store().await?;
    let config = pipeline_config_from_env()?;

    match cli.command {
        Command::Clean => {
            let summary = cleaner::run(&store, &config).await?;
            info!(?summary, "clean finished");
        }
        Command::Aggregate => {
            let summary = aggregator::run(&store, &config).await?;
            info!(?summary, "aggregate finished");
        }
        Command::BuildSeries => {
            let summary = series::run(&store, &config).await?;
            info!(?summary, "build-series finished");
        }
        Command::Run => {
            let summary = pipeline::run(&store, &config).await?;
            info!(?summary, "pipeline finished");
        }
    }

    Ok(())
}

async fn connect_store() -> Result<S3BucketStore> {
    let bucket =
        std::env::var("DEMANDCAST_S3_BUCKET").context("DEMANDCAST_S3_BUCKET must be set")?;
    let mut config = S3Config {
        bucket,
        ..Default::default()
    };
    if let Ok(region) = std::env::var("DEMANDCAST_S3_REGION") {
        config.region = region;
    }
    config.endpoint = std::env::var("DEMANDCAST_S3_ENDPOINT").ok();
    config.access_key_id = std::env::var("DEMANDCAST_S3_ACCESS_KEY_ID").ok();
    config.secret_access_key = std::env::var("DEMANDCAST_S3_SECRET_ACCESS_KEY").ok();
    config.force_path_style = std::env::var("DEMANDCAST_S3_FORCE_PATH_STYLE")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    Ok(S3BucketStore::new(config).await?)
}

fn pipeline_config_from_env() -> Result<PipelineConfig> {
    let mut config = PipelineConfig::default();

    let overrides = [
        ("DEMANDCAST_RAW_PREFIX", &mut config.raw_prefix),
        ("DEMANDCAST_CLEAN_PREFIX", &mut config.clean_prefix),
        ("DEMANDCAST_AGGREGATED_PREFIX", &mut config.aggregated_prefix),
        ("DEMANDCAST_TRAIN_PREFIX", &mut config.train_prefix),
        ("DEMANDCAST_EVAL_PREFIX", &mut config.eval_prefix),
    ];
    for (var, field) in overrides {
        if let Ok(value) = std::env::var(var) {
            *field = value;
        }
    }

    if let Ok(value) = std::env::var("DEMANDCAST_FORECAST_HORIZON") {
        config.forecast_horizon = value
            .parse()
            .context("DEMANDCAST_FORECAST_HORIZON must be a positive integer")?;
    }
    if let Ok(value) = std::env::var("DEMANDCAST_MAX_RETRIES") {
        config.retry.max_retries = value
            .parse()
            .context("DEMANDCAST_MAX_RETRIES must be an integer")?;
    }
    if let Ok(value) = std::env::var("DEMANDCAST_RETRY_BACKOFF_MS") {
        let millis: u64 = value
            .parse()
            .context("DEMANDCAST_RETRY_BACKOFF_MS must be an integer")?;
        config.retry.backoff = std::time::Duration::from_millis(millis);
    }

    config.validate()?;
    Ok(config)
}
