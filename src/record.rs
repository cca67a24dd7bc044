use serde::{Deserialize, Serialize};

/// One validated metric observation from an experiment log.
///
/// Created by the row validator and immutable afterwards. Aggregated points
/// reuse this type: their `value` is a bucket mean and their `step` the
/// bucket's lower bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub experiment_id: String,
    pub metric_name: String,
    pub step: i64,
    pub value: f64,
}

/// The accumulated record collection for one uploaded log.
///
/// Owned exclusively by the ingestion orchestrator while a parse is running;
/// published to consumers as `Arc<Dataset>` once the terminal `Done` event has
/// been observed, which makes it read-only by construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    entries: Vec<LogEntry>,
}

impl Dataset {
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a chunk of newly arrived entries, preserving arrival order.
    pub fn extend(&mut self, entries: Vec<LogEntry>) {
        self.entries.extend(entries);
    }

    /// Distinct experiment ids in first-seen order.
    pub fn experiment_ids(&self) -> Vec<String> {
        distinct(self.entries.iter().map(|entry| entry.experiment_id.as_str()))
    }

    /// Distinct metric names in first-seen order.
    pub fn metric_names(&self) -> Vec<String> {
        distinct(self.entries.iter().map(|entry| entry.metric_name.as_str()))
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = Vec::new();
    for value in values {
        if !seen.iter().any(|existing: &String| existing == value) {
            seen.push(value.to_string());
        }
    }
    seen
}
