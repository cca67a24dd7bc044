//! Background parsing task and its event protocol.
//!
//! One task per upload. The task owns the raw text, streams it through the
//! row validator in fixed-size byte chunks, and reports back over a bounded
//! mpsc channel: zero or more `Progress` and `Chunk` events followed by
//! exactly one terminal `Done` or `Error`. The task keeps no state observable
//! outside the channel; superseding it is done by cancelling its token.

use crate::aggregate::BucketAggregator;
use crate::config::{AggregateMode, IngestConfig};
use crate::metrics;
use crate::parser::RowParser;
use crate::progress::ProgressTracker;
use crate::record::LogEntry;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of the task-to-orchestrator event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Events emitted by the background parsing task, in emission order; the
/// terminal variant is always last.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    Progress { fraction: f64 },
    Chunk { entries: Vec<LogEntry> },
    Done,
    Error { message: String },
}

/// Knobs the task needs from the ingest config.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub bucket_size: i64,
    pub chunk_rows: usize,
    pub progress_every_rows: u64,
    pub mode: AggregateMode,
}

impl From<&IngestConfig> for ParseOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            bucket_size: config.bucket_size,
            chunk_rows: config.chunk_rows.max(1),
            progress_every_rows: config.progress_every_rows,
            mode: config.mode,
        }
    }
}

/// Spawn the parsing task for one upload.
///
/// The returned receiver observes the full event sequence; dropping it (or
/// cancelling the token) ends the task silently, which is how a superseded
/// parse is retired.
pub fn spawn_parse_task(
    raw: Vec<u8>,
    options: ParseOptions,
    cancel: CancellationToken,
) -> (JoinHandle<()>, mpsc::Receiver<ParseEvent>) {
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        run_parse(raw, options, cancel, event_tx).await;
    });
    (handle, event_rx)
}

async fn run_parse(
    raw: Vec<u8>,
    options: ParseOptions,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<ParseEvent>,
) {
    let started = Instant::now();
    let mut emitter = EventEmitter::new(event_tx, options.chunk_rows);
    let mut parser = RowParser::new();
    let mut progress = ProgressTracker::new(raw.len() as u64, options.progress_every_rows);
    let mut aggregator = match options.mode {
        AggregateMode::Batch => Some(BucketAggregator::new(options.bucket_size)),
        AggregateMode::Streaming => None,
    };

    if progress.is_empty_input() {
        debug!("empty upload; completing immediately");
        if emitter.progress(progress.finish()).await && emitter.done().await {
            metrics::INGEST_RUNS_TOTAL
                .with_label_values(&["completed"])
                .inc();
        }
        return;
    }

    debug!(
        total_bytes = raw.len(),
        chunk_rows = options.chunk_rows,
        mode = ?options.mode,
        "starting background parse"
    );

    for chunk in raw.chunks(READ_CHUNK_BYTES) {
        if cancel.is_cancelled() {
            debug!("parse cancelled; stopping without terminal event");
            return;
        }

        let rows_before = parser.rows_seen();
        let backlog_before = parser.backlog_len();
        let entries = match parser.feed(chunk) {
            Ok(entries) => entries,
            Err(err) => {
                fail(&mut emitter, err).await;
                return;
            }
        };

        // Bytes still sitting in the backlog belong to an unfinished row and
        // do not count as consumed yet.
        let consumed = (backlog_before + chunk.len()).saturating_sub(parser.backlog_len());
        progress.record_bytes(consumed as u64);
        progress.record_rows(parser.rows_seen() - rows_before);

        if !dispatch_entries(&mut emitter, &mut aggregator, entries).await {
            return;
        }
        if let Some(fraction) = progress.poll() {
            if !emitter.progress(fraction).await {
                return;
            }
        }
    }

    let rows_before = parser.rows_seen();
    let trailing = match parser.finish() {
        Ok(entries) => entries,
        Err(err) => {
            fail(&mut emitter, err).await;
            return;
        }
    };
    progress.record_rows(parser.rows_seen() - rows_before);
    if !dispatch_entries(&mut emitter, &mut aggregator, trailing).await {
        return;
    }

    if let Some(aggregator) = aggregator.take() {
        debug!(
            bucket_count = aggregator.bucket_count(),
            "flushing aggregated buckets"
        );
        if !emitter.extend(aggregator.flush()).await {
            return;
        }
    }
    if !emitter.flush_pending().await {
        return;
    }

    if !emitter.progress(progress.finish()).await {
        return;
    }
    if emitter.done().await {
        metrics::PARSE_DURATION.observe(started.elapsed().as_secs_f64());
        metrics::INGEST_RUNS_TOTAL
            .with_label_values(&["completed"])
            .inc();
        debug!(
            rows_seen = parser.rows_seen(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "background parse complete"
        );
    }
}

async fn dispatch_entries(
    emitter: &mut EventEmitter,
    aggregator: &mut Option<BucketAggregator>,
    entries: Vec<LogEntry>,
) -> bool {
    match aggregator {
        Some(aggregator) => {
            aggregator.observe_all(&entries);
            true
        }
        None => emitter.extend(entries).await,
    }
}

async fn fail(emitter: &mut EventEmitter, err: anyhow::Error) {
    warn!(error = %err, "background parse failed");
    metrics::INGEST_RUNS_TOTAL.with_label_values(&["failed"]).inc();
    emitter.error(err.to_string()).await;
}

/// Buffers outgoing records into chunk events of `chunk_rows` and tracks
/// whether the receiving side is still listening.
struct EventEmitter {
    event_tx: mpsc::Sender<ParseEvent>,
    pending: Vec<LogEntry>,
    chunk_rows: usize,
}

impl EventEmitter {
    fn new(event_tx: mpsc::Sender<ParseEvent>, chunk_rows: usize) -> Self {
        Self {
            event_tx,
            pending: Vec::new(),
            chunk_rows,
        }
    }

    /// Queue entries, emitting full chunk events as the buffer fills.
    /// Returns false once the receiver is gone.
    async fn extend(&mut self, entries: Vec<LogEntry>) -> bool {
        self.pending.extend(entries);
        while self.pending.len() >= self.chunk_rows {
            let rest = self.pending.split_off(self.chunk_rows);
            let chunk = std::mem::replace(&mut self.pending, rest);
            if !self.send_chunk(chunk).await {
                return false;
            }
        }
        true
    }

    async fn flush_pending(&mut self) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        let chunk = std::mem::take(&mut self.pending);
        self.send_chunk(chunk).await
    }

    async fn send_chunk(&mut self, entries: Vec<LogEntry>) -> bool {
        metrics::ROWS_EMITTED_TOTAL.inc_by(entries.len() as u64);
        metrics::CHUNKS_EMITTED_TOTAL.inc();
        self.send(ParseEvent::Chunk { entries }).await
    }

    async fn progress(&mut self, fraction: f64) -> bool {
        self.send(ParseEvent::Progress { fraction }).await
    }

    async fn done(&mut self) -> bool {
        self.send(ParseEvent::Done).await
    }

    async fn error(&mut self, message: String) -> bool {
        self.send(ParseEvent::Error { message }).await
    }

    async fn send(&mut self, event: ParseEvent) -> bool {
        if self.event_tx.send(event).await.is_err() {
            debug!("event receiver dropped; parse task retiring");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(mode: AggregateMode) -> ParseOptions {
        ParseOptions {
            bucket_size: 5,
            chunk_rows: 2,
            progress_every_rows: 1,
            mode,
        }
    }

    async fn collect_events(raw: &str, options: ParseOptions) -> Vec<ParseEvent> {
        let (handle, mut event_rx) =
            spawn_parse_task(raw.as_bytes().to_vec(), options, CancellationToken::new());
        let mut events = Vec::new();
        while let Some(event) = event_rx.recv().await {
            events.push(event);
        }
        handle.await.expect("parse task should not panic");
        events
    }

    fn entries_of(events: &[ParseEvent]) -> Vec<LogEntry> {
        events
            .iter()
            .filter_map(|event| match event {
                ParseEvent::Chunk { entries } => Some(entries.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn fractions_of(events: &[ParseEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|event| match event {
                ParseEvent::Progress { fraction } => Some(*fraction),
                _ => None,
            })
            .collect()
    }

    const HEADER: &str = "idx,experiment_id,metric_name,step,value\n";

    #[tokio::test]
    async fn terminal_done_is_last_and_unique() {
        let raw = format!("{HEADER}1,expA,loss,0,1.0\n2,expA,loss,1,2.0\n");
        let events = collect_events(&raw, options(AggregateMode::Batch)).await;

        assert_eq!(events.last(), Some(&ParseEvent::Done));
        let terminal_count = events
            .iter()
            .filter(|event| matches!(event, ParseEvent::Done | ParseEvent::Error { .. }))
            .count();
        assert_eq!(terminal_count, 1);
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_ends_at_one() {
        let mut raw = String::from(HEADER);
        for step in 0..100 {
            raw.push_str(&format!("{step},expA,loss,{step},1.0\n"));
        }
        let events = collect_events(&raw, options(AggregateMode::Streaming)).await;

        let fractions = fractions_of(&events);
        assert!(!fractions.is_empty());
        for pair in fractions.windows(2) {
            assert!(pair[0] <= pair[1], "progress regressed: {pair:?}");
        }
        assert_eq!(*fractions.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn batch_mode_emits_aggregated_chunks() {
        let mut raw = String::from(HEADER);
        for step in 0..12 {
            raw.push_str(&format!("{step},expA,loss,{step},{step}.0\n"));
        }
        let events = collect_events(&raw, options(AggregateMode::Batch)).await;

        let entries = entries_of(&events);
        assert_eq!(entries.len(), 3);
        assert_eq!((entries[0].step, entries[0].value), (0, 2.0));
        assert_eq!((entries[1].step, entries[1].value), (5, 7.0));
        assert_eq!((entries[2].step, entries[2].value), (10, 10.5));
    }

    #[tokio::test]
    async fn streaming_mode_emits_raw_rows_in_chunk_batches() {
        let raw = format!(
            "{HEADER}1,expA,loss,0,1.0\n2,expA,loss,1,2.0\n3,expA,loss,2,3.0\n"
        );
        let events = collect_events(&raw, options(AggregateMode::Streaming)).await;

        let chunk_sizes: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                ParseEvent::Chunk { entries } => Some(entries.len()),
                _ => None,
            })
            .collect();
        assert_eq!(chunk_sizes, vec![2, 1]);
        assert_eq!(entries_of(&events).len(), 3);
    }

    #[tokio::test]
    async fn malformed_rows_are_dropped_silently() {
        let raw = format!("{HEADER}1,expA,loss,0,1.0\nbad,row\n3,expA,loss,2,3.0\n");
        let events = collect_events(&raw, options(AggregateMode::Streaming)).await;

        assert_eq!(entries_of(&events).len(), 2);
        assert_eq!(events.last(), Some(&ParseEvent::Done));
    }

    #[tokio::test]
    async fn invalid_utf8_produces_error_terminal() {
        let mut raw = String::from(HEADER).into_bytes();
        raw.extend_from_slice(&[0xff, 0xfe, b'\n']);
        let (handle, mut event_rx) = spawn_parse_task(
            raw,
            options(AggregateMode::Batch),
            CancellationToken::new(),
        );

        let mut events = Vec::new();
        while let Some(event) = event_rx.recv().await {
            events.push(event);
        }
        handle.await.unwrap();

        assert!(matches!(events.last(), Some(ParseEvent::Error { .. })));
        assert!(!events.iter().any(|event| matches!(event, ParseEvent::Done)));
    }

    #[tokio::test]
    async fn empty_input_completes_with_single_full_progress() {
        let events = collect_events("", options(AggregateMode::Batch)).await;
        assert_eq!(
            events,
            vec![ParseEvent::Progress { fraction: 1.0 }, ParseEvent::Done]
        );
    }

    #[tokio::test]
    async fn cancelled_task_emits_no_terminal_event() {
        let mut raw = String::from(HEADER);
        for step in 0..200_000 {
            raw.push_str(&format!("{step},expA,loss,{step},1.0\n"));
        }
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (handle, mut event_rx) = spawn_parse_task(
            raw.into_bytes(),
            options(AggregateMode::Streaming),
            cancel,
        );

        let mut events = Vec::new();
        while let Some(event) = event_rx.recv().await {
            events.push(event);
        }
        handle.await.unwrap();
        assert!(!events
            .iter()
            .any(|event| matches!(event, ParseEvent::Done | ParseEvent::Error { .. })));
    }
}
