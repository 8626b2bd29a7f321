//! Concurrent metric store.
//!
//! One `RwLock` guards the whole map. Writers (`set`, `snapshot_and_reset`)
//! take it exclusively, readers (`get`, `len`) share it. Records are only
//! mutated in place under the write guard and are handed out as clones.

use crate::core::{Metric, MetricKind};
use ahash::AHashMap;
use parking_lot::RwLock;

/// Result of applying one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// First update for the name in its current lifecycle
    Created,
    /// Update applied to the live record
    Updated,
    /// Update dropped because the live record has another kind
    Rejected { existing: MetricKind },
}

impl SetOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, SetOutcome::Rejected { .. })
    }
}

/// Keyed aggregator owning one [`Metric`] per name
#[derive(Debug, Default)]
pub struct MetricStore {
    metrics: RwLock<AHashMap<String, Metric>>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update.
    ///
    /// A name keeps its kind until the record is evicted by a flush;
    /// updates of another kind are rejected and leave the record intact.
    pub fn set(&self, name: &str, kind: MetricKind, value: f64) -> SetOutcome {
        let mut metrics = self.metrics.write();

        match metrics.get_mut(name) {
            Some(metric) if metric.kind != kind => SetOutcome::Rejected {
                existing: metric.kind,
            },
            Some(metric) => {
                metric.apply(value);
                SetOutcome::Updated
            },
            None => {
                metrics.insert(name.to_string(), Metric::new(name, kind, value));
                SetOutcome::Created
            },
        }
    }

    /// Read-only copy of one record
    pub fn get(&self, name: &str) -> Option<Metric> {
        self.metrics.read().get(name).cloned()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    /// Capture every record and apply the retention policy in one
    /// critical section.
    ///
    /// Counters and timers are evicted; gauges stay with their interval
    /// state cleared and `last_value` carried forward. Every returned copy
    /// is stamped with `flushed_at`.
    pub fn snapshot_and_reset(&self, flushed_at: i64) -> Vec<Metric> {
        let mut metrics = self.metrics.write();
        let mut snapshot = Vec::with_capacity(metrics.len());

        metrics.retain(|_, metric| {
            let mut captured = metric.clone();
            captured.flushed_at = Some(flushed_at);
            snapshot.push(captured);

            if metric.kind.is_retained_on_flush() {
                metric.reset_interval();
                metric.flushed_at = Some(flushed_at);
                true
            } else {
                false
            }
        });

        snapshot
    }
}
