//! One-shot ingestion runner for the CLI.
//!
//! Restores the previous session's dataset, ingests the given log file,
//! persists the result and logs a summary the selection surface would show.

use crate::config::Config;
use crate::orchestrator::{IngestOrchestrator, IngestState};
use crate::session::Session;
use crate::store::{DatasetStore, SqliteDatasetStore};
use crate::task::ParseOptions;
use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

pub async fn run(config: &Config, input: &Path) -> Result<()> {
    let store = SqliteDatasetStore::new(config.db_path())
        .with_context(|| format!("failed to open dataset store at {}", config.db_path().display()))?;
    let mut session = Session::new(config.series.render_bucket_size);

    match store.get().await {
        Ok(Some(previous)) => {
            info!(
                entry_count = previous.len(),
                "restored dataset from previous session"
            );
            session.install_dataset(std::sync::Arc::new(previous));
        }
        Ok(None) => debug!("no stored dataset to restore"),
        Err(err) => warn!(error = %err, "failed to restore stored dataset; continuing"),
    }

    let raw = tokio::fs::read(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;

    info!(
        path = %input.display(),
        total_bytes = raw.len(),
        "starting ingestion"
    );

    let mut orchestrator = IngestOrchestrator::new(ParseOptions::from(&config.ingest));
    orchestrator.start_ingestion(raw);

    let mut last_logged_percent = 0u8;
    while orchestrator.process_next_event().await {
        let percent = orchestrator.progress_percent();
        if percent >= last_logged_percent.saturating_add(10) {
            info!(percent, "ingestion progress");
            last_logged_percent = percent;
        }
    }

    match orchestrator.state() {
        IngestState::Ready => {}
        IngestState::Failed { message } => bail!("ingestion failed: {message}"),
        state => bail!("ingestion ended in unexpected state {state:?}"),
    }

    let dataset = orchestrator
        .dataset()
        .expect("ready state implies a published dataset");

    store
        .put(&dataset)
        .await
        .context("failed to persist ingested dataset")?;

    session.install_dataset(dataset.clone());
    info!(
        entry_count = dataset.len(),
        experiments = ?session.experiment_ids(),
        metrics = ?session.metric_names(),
        "ingestion complete; dataset persisted"
    );

    Ok(())
}
