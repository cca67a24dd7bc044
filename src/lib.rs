//! Ingestion pipeline for delimited experiment metric logs.
//!
//! Raw text is parsed off the interactive path by a background task that
//! validates rows, downsamples them into step buckets and reports progress
//! over an ordered event channel. The orchestrator accumulates the task's
//! chunk events into a dataset, freezes it on completion and hands it to the
//! selection/series surface for charting.

pub mod aggregate;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod parser;
pub mod progress;
pub mod record;
pub mod runner;
pub mod series;
pub mod session;
pub mod store;
pub mod task;

pub use config::{AggregateMode, Config};
pub use orchestrator::{IngestOrchestrator, IngestState};
pub use record::{Dataset, LogEntry};
pub use series::{
    join_series, ChartSeries, ExperimentSeries, Selection, SelectionError, SeriesError,
    MAX_SELECTED_EXPERIMENTS,
};
pub use session::Session;
pub use store::{DatasetStore, SqliteDatasetStore, DATASET_SCHEMA_VERSION};
pub use task::{ParseEvent, ParseOptions};
