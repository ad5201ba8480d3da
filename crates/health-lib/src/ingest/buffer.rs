//! Cycle-scoped accumulation of raw signal rows
//!
//! Probe results for one evaluation cycle arrive split over several
//! sub-batches. Rows are appended until the trigger batch arrives, then
//! drained for evaluation and reset for the next cycle. The buffer is never
//! persisted: rows buffered when the process stops are lost.

use serde_json::Value;
use tracing::debug;

/// Raw signal rows of the cycle in progress
#[derive(Debug, Default)]
pub struct RecordBuffer {
    rows: Vec<Value>,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sub-batch. Empty batches are a no-op.
    pub fn add(&mut self, rows: Vec<Value>) {
        if rows.is_empty() {
            return;
        }
        self.rows.extend(rows);
        debug!(pending = self.rows.len(), "Buffered signal rows");
    }

    /// Everything buffered so far. Does not clear; call [`reset`](Self::reset).
    pub fn drain(&self) -> Vec<Value> {
        self.rows.clone()
    }

    pub fn reset(&mut self) {
        self.rows.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
