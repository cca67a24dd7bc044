//! Query surface for selection and chart consumers.
//!
//! Holds the published (frozen) dataset plus the current selection and
//! answers the questions the presentation layer asks: which experiments and
//! metrics exist, what is selected, and the joined series for the selection.

use crate::record::Dataset;
use crate::series::{join_series, ChartSeries, Selection, SelectionError, SeriesError};
use std::sync::Arc;

#[derive(Default)]
pub struct Session {
    dataset: Option<Arc<Dataset>>,
    selection: Selection,
    render_bucket_size: Option<i64>,
}

impl Session {
    pub fn new(render_bucket_size: Option<i64>) -> Self {
        Self {
            dataset: None,
            selection: Selection::default(),
            render_bucket_size,
        }
    }

    /// Install a freshly published or restored dataset. A new dataset resets
    /// the selection, as a new upload does.
    pub fn install_dataset(&mut self, dataset: Arc<Dataset>) {
        self.dataset = Some(dataset);
        self.selection.clear();
    }

    pub fn dataset(&self) -> Option<&Arc<Dataset>> {
        self.dataset.as_ref()
    }

    /// Distinct experiment ids of the installed dataset, first-seen order.
    pub fn experiment_ids(&self) -> Vec<String> {
        self.dataset
            .as_ref()
            .map(|dataset| dataset.experiment_ids())
            .unwrap_or_default()
    }

    /// Distinct metric names of the installed dataset, first-seen order.
    pub fn metric_names(&self) -> Vec<String> {
        self.dataset
            .as_ref()
            .map(|dataset| dataset.metric_names())
            .unwrap_or_default()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn select_experiment(&mut self, id: &str) -> Result<(), SelectionError> {
        self.selection.select_experiment(id)
    }

    pub fn deselect_experiment(&mut self, id: &str) {
        self.selection.deselect_experiment(id);
    }

    pub fn set_metric(&mut self, metric: Option<String>) {
        self.selection.set_metric(metric);
    }

    /// Replace the whole selection, validating the cap atomically.
    pub fn set_selection(
        &mut self,
        experiments: Vec<String>,
        metric: Option<String>,
    ) -> Result<(), SelectionError> {
        self.selection = Selection::new(experiments, metric)?;
        Ok(())
    }

    /// Joined series for the current selection against the installed dataset.
    pub fn series(&self) -> Result<ChartSeries, SeriesError> {
        let Some(dataset) = self.dataset.as_ref() else {
            return Ok(ChartSeries::default());
        };
        join_series(dataset.entries(), &self.selection, self.render_bucket_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogEntry;

    fn entry(experiment: &str, metric: &str, step: i64, value: f64) -> LogEntry {
        LogEntry {
            experiment_id: experiment.to_string(),
            metric_name: metric.to_string(),
            step,
            value,
        }
    }

    fn dataset() -> Arc<Dataset> {
        let mut dataset = Dataset::default();
        dataset.extend(vec![
            entry("expA", "loss", 0, 1.0),
            entry("expB", "loss", 0, 2.0),
            entry("expA", "accuracy", 5, 0.9),
        ]);
        Arc::new(dataset)
    }

    #[test]
    fn empty_session_answers_empty() {
        let session = Session::default();
        assert!(session.experiment_ids().is_empty());
        assert!(session.metric_names().is_empty());
        assert_eq!(session.series().unwrap(), ChartSeries::default());
    }

    #[test]
    fn installing_a_dataset_resets_the_selection() {
        let mut session = Session::default();
        session.install_dataset(dataset());
        session.select_experiment("expA").unwrap();
        session.set_metric(Some("loss".to_string()));

        session.install_dataset(dataset());
        assert!(session.selection().experiments().is_empty());
        assert_eq!(session.selection().metric(), None);
    }

    #[test]
    fn series_follows_the_current_selection() {
        let mut session = Session::default();
        session.install_dataset(dataset());
        session
            .set_selection(
                vec!["expA".to_string(), "expB".to_string()],
                Some("loss".to_string()),
            )
            .unwrap();

        let joined = session.series().unwrap();
        assert_eq!(joined.steps, vec![0]);
        assert_eq!(joined.series.len(), 2);
    }

    #[test]
    fn set_selection_rejects_over_cap_atomically() {
        let mut session = Session::default();
        session.install_dataset(dataset());
        session.select_experiment("expA").unwrap();

        let result = session.set_selection(
            vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "d".to_string(),
            ],
            Some("loss".to_string()),
        );
        assert_eq!(result, Err(SelectionError::TooManyExperiments));
        assert_eq!(session.selection().experiments(), &["expA"]);
    }
}
