//! Selection handling and chart series joining.
//!
//! A selection names at most three experiments and one metric. Joining aligns
//! the selected experiments' points on the sorted union of their steps and
//! marks missing points with explicit gaps, so downstream display never has
//! to guess at alignment.

use crate::aggregate::BucketAggregator;
use crate::record::LogEntry;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Presentation-performance guard: more series than this render too slowly.
pub const MAX_SELECTED_EXPERIMENTS: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("at most {MAX_SELECTED_EXPERIMENTS} experiments can be selected")]
    TooManyExperiments,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeriesError {
    #[error("too many series selected ({selected}); the limit is {MAX_SELECTED_EXPERIMENTS}")]
    TooManySeries { selected: usize },
}

/// The user-chosen experiment set and metric.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    experiments: Vec<String>,
    metric: Option<String>,
}

impl Selection {
    pub fn new(experiments: Vec<String>, metric: Option<String>) -> Result<Self, SelectionError> {
        if experiments.len() > MAX_SELECTED_EXPERIMENTS {
            return Err(SelectionError::TooManyExperiments);
        }
        Ok(Self {
            experiments,
            metric,
        })
    }

    pub fn experiments(&self) -> &[String] {
        &self.experiments
    }

    pub fn metric(&self) -> Option<&str> {
        self.metric.as_deref()
    }

    /// Add an experiment to the selection. Re-selecting an already selected
    /// experiment is a no-op; exceeding the cap leaves the selection
    /// unchanged and reports the rejection.
    pub fn select_experiment(&mut self, id: &str) -> Result<(), SelectionError> {
        if self.experiments.iter().any(|existing| existing == id) {
            return Ok(());
        }
        if self.experiments.len() >= MAX_SELECTED_EXPERIMENTS {
            return Err(SelectionError::TooManyExperiments);
        }
        self.experiments.push(id.to_string());
        Ok(())
    }

    pub fn deselect_experiment(&mut self, id: &str) {
        self.experiments.retain(|existing| existing != id);
    }

    pub fn set_metric(&mut self, metric: Option<String>) {
        self.metric = metric;
    }

    pub fn clear(&mut self) {
        self.experiments.clear();
        self.metric = None;
    }
}

/// One experiment's values aligned on the shared step axis; `None` marks a
/// gap where the experiment has no point at that step.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentSeries {
    pub experiment_id: String,
    pub values: Vec<Option<f64>>,
}

/// Join result: the shared sorted step axis plus one aligned series per
/// selected experiment, in selection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartSeries {
    pub steps: Vec<i64>,
    pub series: Vec<ExperimentSeries>,
}

/// Align the selected experiments' points for one metric on a shared axis.
///
/// The series cap is enforced before any join work. An empty selection (no
/// metric or no experiments) joins to an empty result. When
/// `render_bucket_size` is set the filtered points are compressed through the
/// bucket aggregator first, which is how streaming-mode datasets get their
/// downsampling at render time.
pub fn join_series(
    entries: &[LogEntry],
    selection: &Selection,
    render_bucket_size: Option<i64>,
) -> Result<ChartSeries, SeriesError> {
    let selected = selection.experiments().len();
    if selected > MAX_SELECTED_EXPERIMENTS {
        return Err(SeriesError::TooManySeries { selected });
    }

    let Some(metric) = selection.metric() else {
        return Ok(ChartSeries::default());
    };
    if selection.experiments().is_empty() {
        return Ok(ChartSeries::default());
    }

    let filtered: Vec<LogEntry> = entries
        .iter()
        .filter(|entry| {
            entry.metric_name == metric
                && selection
                    .experiments()
                    .iter()
                    .any(|id| id == &entry.experiment_id)
        })
        .cloned()
        .collect();

    let filtered = match render_bucket_size {
        Some(size) => {
            let mut aggregator = BucketAggregator::new(size);
            aggregator.observe_all(&filtered);
            aggregator.flush()
        }
        None => filtered,
    };

    let steps: Vec<i64> = filtered
        .iter()
        .map(|entry| entry.step)
        .collect::<BTreeSet<i64>>()
        .into_iter()
        .collect();

    let mut by_experiment: HashMap<&str, HashMap<i64, f64>> = HashMap::new();
    for entry in &filtered {
        // First occurrence wins when a step appears twice for one experiment.
        by_experiment
            .entry(entry.experiment_id.as_str())
            .or_default()
            .entry(entry.step)
            .or_insert(entry.value);
    }

    let series = selection
        .experiments()
        .iter()
        .map(|experiment_id| {
            let points = by_experiment.get(experiment_id.as_str());
            ExperimentSeries {
                experiment_id: experiment_id.clone(),
                values: steps
                    .iter()
                    .map(|step| points.and_then(|points| points.get(step).copied()))
                    .collect(),
            }
        })
        .collect();

    Ok(ChartSeries { steps, series })
}
