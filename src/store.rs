//! Persistent dataset store.
//!
//! One versioned whole-blob slot with replace semantics: `put` overwrites the
//! previous session's dataset, `get` restores it, and a blob written under a
//! different schema version reads back as absent. The pipeline itself never
//! touches the concrete implementation; it only sees the trait.

use crate::metrics;
use crate::record::Dataset;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::task;

/// Version of the persisted dataset blob layout.
pub const DATASET_SCHEMA_VERSION: u32 = 2;

const DATASET_SLOT: &str = "latest";

/// Minimal key-value interface for saving and restoring one dataset blob.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    async fn put(&self, dataset: &Dataset) -> Result<()>;
    async fn get(&self) -> Result<Option<Dataset>>;
}

/// SQLite-backed store, one row per slot, JSON payload.
#[derive(Debug, Clone)]
pub struct SqliteDatasetStore {
    path: Arc<PathBuf>,
}

impl SqliteDatasetStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store directory {}", parent.display()))?;
        }

        let conn = open_connection(&path)?;
        initialize_schema(&conn)?;

        Ok(Self {
            path: Arc::new(path),
        })
    }
}

#[async_trait]
impl DatasetStore for SqliteDatasetStore {
    async fn put(&self, dataset: &Dataset) -> Result<()> {
        let db_path = self.path.clone();
        let payload = serde_json::to_vec(dataset).context("failed to encode dataset blob")?;
        let timestamp = current_timestamp();
        let started = Instant::now();

        task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            conn.execute(
                "
                INSERT INTO datasets (slot, schema_version, payload, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(slot) DO UPDATE SET
                    schema_version = excluded.schema_version,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
                ",
                params![DATASET_SLOT, DATASET_SCHEMA_VERSION, payload, timestamp],
            )
            .context("failed to upsert dataset blob")?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .context("dataset put join error")??;

        metrics::STORE_DURATION
            .with_label_values(&["put"])
            .observe(started.elapsed().as_secs_f64());
        Ok(())
    }

    async fn get(&self) -> Result<Option<Dataset>> {
        let db_path = self.path.clone();
        let started = Instant::now();

        let row = task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            let mut stmt = conn
                .prepare(
                    "
                    SELECT schema_version, payload
                    FROM datasets
                    WHERE slot = ?1
                    ",
                )
                .context("failed to prepare dataset select statement")?;

            let row = stmt
                .query_row(params![DATASET_SLOT], |row| {
                    let schema_version: u32 = row.get(0)?;
                    let payload: Vec<u8> = row.get(1)?;
                    Ok((schema_version, payload))
                })
                .optional()
                .context("failed to query dataset table")?;

            Ok::<_, anyhow::Error>(row)
        })
        .await
        .context("dataset get join error")??;

        metrics::STORE_DURATION
            .with_label_values(&["get"])
            .observe(started.elapsed().as_secs_f64());

        let Some((schema_version, payload)) = row else {
            return Ok(None);
        };
        if schema_version != DATASET_SCHEMA_VERSION {
            // Stale layout; whole-blob replace semantics mean the next put
            // simply overwrites it.
            return Ok(None);
        }

        let dataset =
            serde_json::from_slice(&payload).context("failed to decode dataset blob")?;
        Ok(Some(dataset))
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open dataset store {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL mode for dataset store")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set dataset store synchronous mode")?;

    Ok(conn)
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS datasets (
            slot TEXT PRIMARY KEY,
            schema_version INTEGER NOT NULL,
            payload BLOB NOT NULL,
            updated_at INTEGER NOT NULL
        );
        ",
    )
    .context("failed to create datasets table")?;

    Ok(())
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or_default()
}
