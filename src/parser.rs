//! Buffered row tokenizer and schema validation.
//!
//! Raw log text is fed in byte chunks; complete lines are drained from an
//! internal buffer while a trailing partial line stays in the backlog until
//! more bytes arrive or `finish` is called. Each data line is validated
//! against the fixed positional schema and either becomes a `LogEntry` or is
//! silently dropped.

use crate::record::LogEntry;
use anyhow::{bail, Result};

/// Fixed positional schema: `index, experiment_id, metric_name, step, value`.
pub const SCHEMA_FIELD_COUNT: usize = 5;

const FIELD_DELIMITER: char = ',';

/// Incremental row parser for one upload.
///
/// The first complete line is treated as the header and skipped. Rows are
/// validated in place; malformed rows produce no output and no error.
#[derive(Default)]
pub struct RowParser {
    buffer: Vec<u8>,
    header_seen: bool,
    rows_seen: u64,
}

impl RowParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of raw bytes and return the entries validated from the
    /// complete lines it finished.
    ///
    /// A line that is not valid UTF-8 is a structural fault of the input, not
    /// a malformed row, and aborts the parse.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<LogEntry>> {
        self.buffer.extend_from_slice(data);
        let lines = drain_complete_lines(&mut self.buffer);

        let mut entries = Vec::new();
        for raw_line in lines {
            self.consume_line(&raw_line, &mut entries)?;
        }
        Ok(entries)
    }

    /// Flush the trailing line once no more bytes will arrive.
    pub fn finish(&mut self) -> Result<Vec<LogEntry>> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        let raw_line = std::mem::take(&mut self.buffer);
        let mut entries = Vec::new();
        self.consume_line(&raw_line, &mut entries)?;
        Ok(entries)
    }

    /// Bytes still buffered as an incomplete line.
    pub fn backlog_len(&self) -> usize {
        self.buffer.len()
    }

    /// Data rows examined so far, valid or not (header excluded).
    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    fn consume_line(&mut self, raw_line: &[u8], entries: &mut Vec<LogEntry>) -> Result<()> {
        let line = trim_line_bytes(raw_line);
        if line.is_empty() {
            return Ok(());
        }

        let Ok(text) = std::str::from_utf8(line) else {
            bail!("input line is not valid UTF-8");
        };

        if !self.header_seen {
            self.header_seen = true;
            return Ok(());
        }

        self.rows_seen += 1;
        if let Some(entry) = validate_row(text) {
            entries.push(entry);
        }
        Ok(())
    }
}

/// Validate one delimited data row against the fixed schema.
///
/// Checks, in order: field count, non-empty identifiers after trimming, a
/// numeric step, a finite value. Any violation drops the row.
pub fn validate_row(line: &str) -> Option<LogEntry> {
    let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    if fields.len() != SCHEMA_FIELD_COUNT {
        return None;
    }

    let experiment_id = fields[1].trim();
    let metric_name = fields[2].trim();
    if experiment_id.is_empty() || metric_name.is_empty() {
        return None;
    }

    let step = parse_step(fields[3])?;
    let value = parse_value(fields[4])?;

    Some(LogEntry {
        experiment_id: experiment_id.to_string(),
        metric_name: metric_name.to_string(),
        step,
        value,
    })
}

/// Parse a step field as an integer, accepting integral float spellings such
/// as `"2.0"` but rejecting fractional or non-finite values.
fn parse_step(field: &str) -> Option<i64> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(step) = trimmed.parse::<i64>() {
        return Some(step);
    }

    let as_float = trimmed.parse::<f64>().ok()?;
    if !as_float.is_finite() || as_float.fract() != 0.0 {
        return None;
    }
    if as_float < i64::MIN as f64 || as_float > i64::MAX as f64 {
        return None;
    }
    Some(as_float as i64)
}

fn parse_value(field: &str) -> Option<f64> {
    let value = field.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

pub(crate) fn drain_complete_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    let mut start = 0usize;

    for (idx, byte) in buffer.iter().enumerate() {
        if *byte == b'\n' {
            let line = buffer[start..idx].to_vec();
            lines.push(line);
            start = idx + 1;
        }
    }

    if start > 0 {
        buffer.drain(0..start);
    }

    lines
}

pub(crate) fn trim_line_bytes(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b' ') {
        end -= 1;
    }
    &line[..end]
}
