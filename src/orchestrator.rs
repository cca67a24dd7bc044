//! Ingestion orchestration on the interactive side.
//!
//! The orchestrator owns the accumulating dataset exclusively and mutates it
//! only while processing one channel event at a time. At most one background
//! parsing task is alive per orchestrator; starting a new ingestion retires
//! the previous task through an RAII guard that cancels and aborts it on
//! every exit path, including drop of the orchestrator itself.

use crate::record::Dataset;
use crate::task::{spawn_parse_task, ParseEvent, ParseOptions};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Externally visible ingestion state.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestState {
    Idle,
    Running { percent: u8 },
    Ready,
    Failed { message: String },
}

const TASK_CRASH_MESSAGE: &str = "background parse task terminated unexpectedly";

pub struct IngestOrchestrator {
    options: ParseOptions,
    state: IngestState,
    accumulating: Dataset,
    published: Option<Arc<Dataset>>,
    active: Option<ActiveParse>,
}

/// Handle to the in-flight background task. Dropping it cancels the token and
/// aborts the join handle, so a superseded or abandoned parse can never
/// outlive its orchestrator slot.
struct ActiveParse {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    events: mpsc::Receiver<ParseEvent>,
}

impl Drop for ActiveParse {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl IngestOrchestrator {
    pub fn new(options: ParseOptions) -> Self {
        Self {
            options,
            state: IngestState::Idle,
            accumulating: Dataset::default(),
            published: None,
            active: None,
        }
    }

    /// Begin ingesting a new upload.
    ///
    /// Any in-flight task is terminated first, and both the previously
    /// published dataset and any partial accumulation are discarded.
    pub fn start_ingestion(&mut self, raw: Vec<u8>) {
        if let Some(previous) = self.active.take() {
            warn!("superseding in-flight ingestion");
            crate::metrics::INGEST_RUNS_TOTAL
                .with_label_values(&["superseded"])
                .inc();
            drop(previous);
        }

        self.accumulating = Dataset::default();
        self.published = None;
        self.state = IngestState::Running { percent: 0 };

        let cancel = CancellationToken::new();
        let (handle, events) = spawn_parse_task(raw, self.options.clone(), cancel.clone());
        self.active = Some(ActiveParse {
            cancel,
            handle: Some(handle),
            events,
        });
        info!("ingestion started");
    }

    /// Await and apply the next task event.
    ///
    /// Returns true while the ingestion is still running; false once a
    /// terminal event (or a task crash) has been resolved or when no task is
    /// active. This is the only point where the interactive side suspends.
    pub async fn process_next_event(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        match active.events.recv().await {
            Some(ParseEvent::Progress { fraction }) => {
                self.apply_progress(fraction);
                true
            }
            Some(ParseEvent::Chunk { entries }) => {
                debug!(entry_count = entries.len(), "chunk appended to dataset");
                self.accumulating.extend(entries);
                true
            }
            Some(ParseEvent::Done) => {
                self.complete();
                false
            }
            Some(ParseEvent::Error { message }) => {
                self.fail(message);
                false
            }
            None => {
                // The channel closed without a terminal event: the task
                // crashed. Resolve it exactly like an explicit error.
                let message = self.describe_crash().await;
                self.fail(message);
                false
            }
        }
    }

    /// Process events until the ingestion resolves.
    pub async fn run_to_completion(&mut self) -> &IngestState {
        while self.process_next_event().await {}
        &self.state
    }

    pub fn state(&self) -> &IngestState {
        &self.state
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, IngestState::Running { .. })
    }

    /// Displayable completion percentage; never decreases within one run.
    pub fn progress_percent(&self) -> u8 {
        match self.state {
            IngestState::Running { percent } => percent,
            IngestState::Ready => 100,
            _ => 0,
        }
    }

    /// The frozen dataset of the last successful ingestion, if any.
    pub fn dataset(&self) -> Option<Arc<Dataset>> {
        self.published.clone()
    }

    /// Install an externally restored dataset (e.g. from the persistent
    /// store) as the published one. Ignored while an ingestion is running.
    pub fn install_dataset(&mut self, dataset: Dataset) -> Option<Arc<Dataset>> {
        if self.is_busy() {
            warn!("refusing to install dataset while an ingestion is running");
            return None;
        }
        let frozen = Arc::new(dataset);
        self.published = Some(frozen.clone());
        self.state = IngestState::Ready;
        Some(frozen)
    }

    fn apply_progress(&mut self, fraction: f64) {
        let incoming = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u8;
        if let IngestState::Running { percent } = &mut self.state {
            if incoming > *percent {
                *percent = incoming;
            }
            debug!(percent = *percent, "ingestion progress");
        }
    }

    fn complete(&mut self) {
        let frozen = Arc::new(std::mem::take(&mut self.accumulating));
        info!(entry_count = frozen.len(), "ingestion complete; dataset published");
        self.published = Some(frozen);
        self.state = IngestState::Ready;
        self.active = None;
    }

    fn fail(&mut self, message: String) {
        warn!(message = %message, "ingestion failed; discarding partial dataset");
        self.accumulating = Dataset::default();
        self.published = None;
        self.state = IngestState::Failed { message };
        self.active = None;
    }

    async fn describe_crash(&mut self) -> String {
        let Some(mut active) = self.active.take() else {
            return TASK_CRASH_MESSAGE.to_string();
        };
        let Some(handle) = active.handle.take() else {
            return TASK_CRASH_MESSAGE.to_string();
        };
        match handle.await {
            Err(err) if err.is_panic() => {
                format!("{TASK_CRASH_MESSAGE}: panic in parse task")
            }
            _ => TASK_CRASH_MESSAGE.to_string(),
        }
    }
}
