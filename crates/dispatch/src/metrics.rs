use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Operational counters for one dispatcher.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatcherMetrics {
    /// Items accepted by `invoke_*` (rejected-after-dispose items excluded).
    pub items_enqueued: u64,
    /// Items that ran, successfully or not.
    pub items_executed: u64,
    /// Items whose future settled with a failure.
    pub items_failed: u64,
    /// Panics raised by the pump machinery itself rather than by an item.
    pub machinery_faults: u64,
    /// Wake-ups that executed at least one item.
    pub drain_passes: u64,
    /// Successful `run` entries.
    pub runs_started: u64,
    /// Largest queue depth seen at enqueue time.
    pub peak_queue_depth: usize,
    /// Mean execution time over all executed items.
    pub avg_item_duration: Duration,
    /// When the most recent item finished.
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl DispatcherMetrics {
    pub fn record_enqueue(&mut self, depth: usize) {
        self.items_enqueued += 1;
        self.peak_queue_depth = self.peak_queue_depth.max(depth);
    }

    /// Record an item execution.
    pub fn record_execution(&mut self, duration: Duration, failed: bool) {
        self.items_executed += 1;
        if failed {
            self.items_failed += 1;
        }
        self.last_executed_at = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let count = self.items_executed;
        self.avg_item_duration = if count == 1 {
            duration
        } else {
            let prev_nanos = self.avg_item_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    /// Items still waiting, as far as the counters can tell.
    pub fn backlog(&self) -> u64 {
        self.items_enqueued.saturating_sub(self.items_executed)
    }
}
