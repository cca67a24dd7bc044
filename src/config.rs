use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub series: SeriesConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// How aggregation runs inside the background parsing task.
///
/// Batch accumulates buckets in the task and emits averaged points at end of
/// input. Streaming emits raw records incrementally for progressive display
/// and defers compression to render time.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMode {
    #[default]
    Batch,
    Streaming,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_bucket_size")]
    pub bucket_size: i64,
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,
    #[serde(default = "default_progress_every_rows")]
    pub progress_every_rows: u64,
    #[serde(default)]
    pub mode: AggregateMode,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SeriesConfig {
    /// Second-stage bucket width applied by the joiner at render time.
    /// Mostly useful with streaming ingestion, where chunks carry raw rows.
    #[serde(default)]
    pub render_bucket_size: Option<i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

const DEFAULT_CHUNK_ROWS: usize = 256;
const DEFAULT_PROGRESS_EVERY_ROWS: u64 = 500;
const DEFAULT_DB_PATH: &str = "~/.steplog/datasets.db";

fn default_bucket_size() -> i64 {
    crate::aggregate::DEFAULT_BUCKET_SIZE
}

fn default_chunk_rows() -> usize {
    DEFAULT_CHUNK_ROWS
}

fn default_progress_every_rows() -> u64 {
    DEFAULT_PROGRESS_EVERY_ROWS
}

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bucket_size: default_bucket_size(),
            chunk_rows: default_chunk_rows(),
            progress_every_rows: default_progress_every_rows(),
            mode: AggregateMode::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.ingest.bucket_size < 1 {
            anyhow::bail!("ingest.bucket_size must be at least 1");
        }
        if self.ingest.chunk_rows == 0 {
            anyhow::bail!("ingest.chunk_rows must be at least 1");
        }
        if self.ingest.progress_every_rows == 0 {
            anyhow::bail!("ingest.progress_every_rows must be at least 1");
        }
        if let Some(size) = self.series.render_bucket_size {
            if size < 1 {
                anyhow::bail!("series.render_bucket_size must be at least 1");
            }
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.store.db_path);
        PathBuf::from(expanded.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_are_missing() {
        let config: Config = toml::from_str("").expect("empty config should parse");
        assert_eq!(config.ingest.bucket_size, 5);
        assert_eq!(config.ingest.chunk_rows, 256);
        assert_eq!(config.ingest.progress_every_rows, 500);
        assert_eq!(config.ingest.mode, AggregateMode::Batch);
        assert_eq!(config.series.render_bucket_size, None);
    }

    #[test]
    fn sections_override_defaults() {
        let raw = r#"
            [ingest]
            bucket_size = 10
            mode = "streaming"

            [series]
            render_bucket_size = 10

            [store]
            db_path = "/tmp/steplog-test.db"
        "#;
        let config: Config = toml::from_str(raw).expect("config should parse");
        config.validate().expect("config should validate");
        assert_eq!(config.ingest.bucket_size, 10);
        assert_eq!(config.ingest.mode, AggregateMode::Streaming);
        assert_eq!(config.series.render_bucket_size, Some(10));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/steplog-test.db"));
    }

    #[test]
    fn invalid_sizes_are_rejected() {
        let config: Config = toml::from_str("[ingest]\nbucket_size = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[ingest]\nchunk_rows = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[series]\nrender_bucket_size = 0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
