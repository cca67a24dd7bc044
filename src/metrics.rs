//! Prometheus metrics for the ingestion pipeline.
//!
//! All metrics use the default Prometheus registry and follow naming conventions:
//! - Histograms: *_seconds (for latency)
//! - Counters: *_total (for counts)

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Histogram, HistogramVec, IntCounter, IntCounterVec,
};

lazy_static! {
    pub static ref PARSE_DURATION: Histogram = register_histogram!(
        "steplog_parse_duration_seconds",
        "Time spent parsing one upload end to end",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    )
    .unwrap();
    pub static ref STORE_DURATION: HistogramVec = register_histogram_vec!(
        "steplog_store_duration_seconds",
        "Time spent on dataset store operations",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    )
    .unwrap();
    pub static ref ROWS_EMITTED_TOTAL: IntCounter = register_int_counter!(
        "steplog_rows_emitted_total",
        "Records emitted over chunk events"
    )
    .unwrap();
    pub static ref CHUNKS_EMITTED_TOTAL: IntCounter = register_int_counter!(
        "steplog_chunks_emitted_total",
        "Chunk events emitted by parse tasks"
    )
    .unwrap();
    pub static ref INGEST_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "steplog_ingest_runs_total",
        "Ingestion runs by outcome",
        &["status"]
    )
    .unwrap();
}
