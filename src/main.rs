use anyhow::{Context, Result};
use std::path::PathBuf;
use steplog::config::Config;
use steplog::runner;
use tracing::info;

const CONFIG_ENV: &str = "STEPLOG_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "steplog.toml";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path =
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    let input = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: steplog <metrics-log.csv>")?;

    tokio::select! {
        result = runner::run(&config, &input) => result,
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "failed while waiting for shutdown signal");
            }
            info!("interrupted; abandoning ingestion");
            Ok(())
        }
    }
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
