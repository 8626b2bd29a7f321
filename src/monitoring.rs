//! Self-monitoring for tallyd.
//!
//! A [`Monitor`] is created once and shared by every component that
//! produces operational events. Counters are lock-free; the per-category
//! rejection table sits behind a short mutex.

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::core::TallyError;

/// Point-in-time copy of the monitor counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    /// Lines applied to the store.
    pub lines_accepted: u64,
    /// Lines rejected by the parser or the line length limit.
    pub lines_rejected: u64,
    /// Rejections keyed by error category.
    pub rejected_by_category: BTreeMap<&'static str, u64>,
    /// Updates dropped because the name is live with another kind.
    pub kind_conflicts: u64,
    /// TCP sessions accepted since start.
    pub connections_accepted: u64,
    /// TCP sessions currently open.
    pub connections_active: u64,
    /// Sessions that ended on a transport error.
    pub connection_errors: u64,
    /// Completed flush cycles.
    pub flushes: u64,
    /// Metrics handed to the export queue.
    pub metrics_flushed: u64,
    /// Snapshot metrics dropped because a flush was cut short by shutdown.
    pub metrics_abandoned: u64,
    /// Data points written to the sink.
    pub points_exported: u64,
    /// Data points the sink failed to deliver.
    pub export_failures: u64,
    /// Internal defects detected at export time.
    pub invariant_violations: u64,
    /// Time since the monitor was created.
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
}

/// Shared operational counters.
#[derive(Debug)]
pub struct Monitor {
    lines_accepted: AtomicU64,
    lines_rejected: AtomicU64,
    rejected_by_category: Mutex<AHashMap<&'static str, u64>>,
    kind_conflicts: AtomicU64,
    connections_accepted: AtomicU64,
    connections_active: AtomicU64,
    connection_errors: AtomicU64,
    flushes: AtomicU64,
    metrics_flushed: AtomicU64,
    metrics_abandoned: AtomicU64,
    points_exported: AtomicU64,
    export_failures: AtomicU64,
    invariant_violations: AtomicU64,
    started: Instant,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            lines_accepted: AtomicU64::new(0),
            lines_rejected: AtomicU64::new(0),
            rejected_by_category: Mutex::new(AHashMap::new()),
            kind_conflicts: AtomicU64::new(0),
            connections_accepted: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            metrics_flushed: AtomicU64::new(0),
            metrics_abandoned: AtomicU64::new(0),
            points_exported: AtomicU64::new(0),
            export_failures: AtomicU64::new(0),
            invariant_violations: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_line_accepted(&self) {
        self.lines_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rejected line under the error's category
    pub fn record_line_rejected(&self, error: &TallyError) {
        self.record_rejection(error.category());
    }

    /// Count a rejected line under an explicit category
    pub fn record_rejection(&self, category: &'static str) {
        self.lines_rejected.fetch_add(1, Ordering::Relaxed);
        *self.rejected_by_category.lock().entry(category).or_insert(0) += 1;
    }

    pub fn record_kind_conflict(&self) {
        self.kind_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self, failed: bool) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        if failed {
            self.connection_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_flush(&self, metrics: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.metrics_flushed.fetch_add(metrics as u64, Ordering::Relaxed);
    }

    pub fn record_metrics_abandoned(&self, metrics: usize) {
        self.metrics_abandoned.fetch_add(metrics as u64, Ordering::Relaxed);
    }

    pub fn record_points_exported(&self, points: usize) {
        self.points_exported.fetch_add(points as u64, Ordering::Relaxed);
    }

    pub fn record_export_failure(&self) {
        self.export_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invariant_violation(&self) {
        self.invariant_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter
    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            lines_accepted: self.lines_accepted.load(Ordering::Relaxed),
            lines_rejected: self.lines_rejected.load(Ordering::Relaxed),
            rejected_by_category: self
                .rejected_by_category
                .lock()
                .iter()
                .map(|(category, count)| (*category, *count))
                .collect(),
            kind_conflicts: self.kind_conflicts.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            metrics_flushed: self.metrics_flushed.load(Ordering::Relaxed),
            metrics_abandoned: self.metrics_abandoned.load(Ordering::Relaxed),
            points_exported: self.points_exported.load(Ordering::Relaxed),
            export_failures: self.export_failures.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
            uptime: self.started.elapsed(),
        }
    }

    /// Emit a one-line debug summary
    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::debug!(
            lines_accepted = s.lines_accepted,
            lines_rejected = s.lines_rejected,
            kind_conflicts = s.kind_conflicts,
            connections_active = s.connections_active,
            flushes = s.flushes,
            metrics_flushed = s.metrics_flushed,
            metrics_abandoned = s.metrics_abandoned,
            points_exported = s.points_exported,
            export_failures = s.export_failures,
            invariant_violations = s.invariant_violations,
            "Daemon counters"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_creation() {
        let snapshot = Monitor::new().snapshot();
        assert_eq!(snapshot.lines_accepted, 0);
        assert_eq!(snapshot.flushes, 0);
        assert!(snapshot.rejected_by_category.is_empty());
    }

    #[test]
    fn test_rejections_by_category() {
        let monitor = Monitor::new();
        monitor.record_line_rejected(&TallyError::malformed("x"));
        monitor.record_line_rejected(&TallyError::malformed("y"));
        monitor.record_line_rejected(&TallyError::InvalidValue("abc".into()));
        monitor.record_rejection("line_too_long");

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.lines_rejected, 4);
        assert_eq!(snapshot.rejected_by_category.get("malformed_line"), Some(&2));
        assert_eq!(snapshot.rejected_by_category.get("invalid_value"), Some(&1));
        assert_eq!(snapshot.rejected_by_category.get("line_too_long"), Some(&1));
    }

    #[test]
    fn test_connection_tracking() {
        let monitor = Monitor::new();
        monitor.record_connection_opened();
        monitor.record_connection_opened();
        monitor.record_connection_closed(false);
        monitor.record_connection_closed(true);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.connections_accepted, 2);
        assert_eq!(snapshot.connections_active, 0);
        assert_eq!(snapshot.connection_errors, 1);
    }

    #[test]
    fn test_flush_and_export_counters() {
        let monitor = Monitor::new();
        monitor.record_flush(3);
        monitor.record_flush(2);
        monitor.record_metrics_abandoned(4);
        monitor.record_points_exported(7);
        monitor.record_export_failure();
        monitor.record_invariant_violation();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.flushes, 2);
        assert_eq!(snapshot.metrics_flushed, 5);
        assert_eq!(snapshot.metrics_abandoned, 4);
        assert_eq!(snapshot.points_exported, 7);
        assert_eq!(snapshot.export_failures, 1);
        assert_eq!(snapshot.invariant_violations, 1);
    }
}
