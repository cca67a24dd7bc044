//! Completion-fraction bookkeeping for one parse run.
//!
//! The fraction is consumed bytes over total bytes, clamped to `[0, 1]` and
//! monotonically non-decreasing. Emission is rate-limited to every K examined
//! rows so event volume stays bounded on large uploads; the terminal flush
//! always reports exactly 1.0.

/// Tracks consumed input and decides when a progress event is due.
pub struct ProgressTracker {
    total_bytes: u64,
    consumed_bytes: u64,
    rows_since_emit: u64,
    every_rows: u64,
    last_fraction: f64,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, every_rows: u64) -> Self {
        Self {
            total_bytes,
            consumed_bytes: 0,
            rows_since_emit: 0,
            every_rows: every_rows.max(1),
            last_fraction: 0.0,
        }
    }

    /// True when the input had no bytes at all; such a run completes
    /// immediately with a single 100% event.
    pub fn is_empty_input(&self) -> bool {
        self.total_bytes == 0
    }

    pub fn record_bytes(&mut self, bytes: u64) {
        self.consumed_bytes = self
            .consumed_bytes
            .saturating_add(bytes)
            .min(self.total_bytes);
    }

    pub fn record_rows(&mut self, rows: u64) {
        self.rows_since_emit = self.rows_since_emit.saturating_add(rows);
    }

    /// Return the next fraction to emit, if one is due.
    ///
    /// Due means at least `every_rows` rows were examined since the last
    /// emission and the fraction advanced. Intermediate polls never report
    /// 1.0; the final value is reserved for `finish`.
    pub fn poll(&mut self) -> Option<f64> {
        if self.rows_since_emit < self.every_rows {
            return None;
        }
        let fraction = self.fraction();
        if fraction <= self.last_fraction || fraction >= 1.0 {
            return None;
        }
        self.rows_since_emit = 0;
        self.last_fraction = fraction;
        Some(fraction)
    }

    /// Terminal fraction, always exactly 1.0.
    pub fn finish(&mut self) -> f64 {
        self.rows_since_emit = 0;
        self.last_fraction = 1.0;
        1.0
    }

    fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.consumed_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_emission_before_row_threshold() {
        let mut tracker = ProgressTracker::new(100, 10);
        tracker.record_bytes(50);
        tracker.record_rows(9);
        assert_eq!(tracker.poll(), None);

        tracker.record_rows(1);
        assert_eq!(tracker.poll(), Some(0.5));
    }

    #[test]
    fn emitted_fractions_are_monotonic() {
        let mut tracker = ProgressTracker::new(100, 1);
        let mut observed = Vec::new();

        for _ in 0..10 {
            tracker.record_bytes(10);
            tracker.record_rows(1);
            if let Some(fraction) = tracker.poll() {
                observed.push(fraction);
            }
        }
        observed.push(tracker.finish());

        for pair in observed.windows(2) {
            assert!(pair[0] <= pair[1], "progress regressed: {pair:?}");
        }
        assert_eq!(*observed.last().unwrap(), 1.0);
    }

    #[test]
    fn intermediate_polls_never_reach_one() {
        let mut tracker = ProgressTracker::new(10, 1);
        tracker.record_bytes(10);
        tracker.record_rows(1);
        assert_eq!(tracker.poll(), None);
        assert_eq!(tracker.finish(), 1.0);
    }

    #[test]
    fn unchanged_fraction_is_not_re_emitted() {
        let mut tracker = ProgressTracker::new(100, 1);
        tracker.record_bytes(50);
        tracker.record_rows(1);
        assert_eq!(tracker.poll(), Some(0.5));

        tracker.record_rows(1);
        assert_eq!(tracker.poll(), None);
    }

    #[test]
    fn zero_total_completes_immediately() {
        let mut tracker = ProgressTracker::new(0, 5);
        assert!(tracker.is_empty_input());
        assert_eq!(tracker.finish(), 1.0);
    }

    #[test]
    fn consumed_bytes_clamp_to_total() {
        let mut tracker = ProgressTracker::new(10, 1);
        tracker.record_bytes(50);
        tracker.record_rows(1);
        assert_eq!(tracker.poll(), None);
        assert_eq!(tracker.finish(), 1.0);
    }
}
