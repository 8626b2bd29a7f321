//! Export pipeline: a bounded queue of flushed metrics drained by a pool of
//! workers that compute statistics and hand the points to a [`Sink`].
//!
//! Producers block on [`ExportIntake::submit`] while the queue is full, so a
//! slow backend delays the next flush instead of dropping metrics. Each
//! data point is delivered independently; a failure is logged, counted and
//! forgotten without affecting the metric's other points.

pub mod sink;

pub use sink::{GraphiteSink, MemorySink, Sink};

use crate::core::{DataPoint, Metric, Result, TallyError};
use crate::metrics::stats::{compute_points, StatsSettings};
use crate::monitoring::Monitor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Queue capacity for a memory budget, never below one slot.
pub fn queue_capacity(memory_budget_bytes: usize, average_item_bytes: usize) -> usize {
    if average_item_bytes == 0 {
        return 1;
    }
    (memory_budget_bytes / average_item_bytes).max(1)
}

/// Producer handle onto the export queue
#[derive(Debug, Clone)]
pub struct ExportIntake {
    sender: mpsc::Sender<Metric>,
}

impl ExportIntake {
    /// Enqueue one metric, waiting for a free slot when the queue is full.
    pub async fn submit(&self, metric: Metric) -> Result<()> {
        self.sender.send(metric).await.map_err(|_| TallyError::ChannelSend)
    }

    /// Configured queue capacity
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

/// Worker pool draining the export queue
pub struct ExportPipeline {
    intake: ExportIntake,
    workers: Vec<JoinHandle<()>>,
}

impl ExportPipeline {
    /// Create the queue and start `workers` tasks on the current runtime.
    pub fn spawn(
        capacity: usize,
        workers: usize,
        settings: StatsSettings,
        sink: Arc<dyn Sink>,
        monitor: Arc<Monitor>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let queue = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&queue),
                    settings,
                    sink: Arc::clone(&sink),
                    monitor: Arc::clone(&monitor),
                };
                tokio::spawn(worker.run())
            })
            .collect::<Vec<_>>();

        tracing::info!(capacity = capacity.max(1), workers = workers.len(), "Export pipeline started");

        Self {
            intake: ExportIntake { sender },
            workers,
        }
    }

    /// New producer handle
    pub fn intake(&self) -> ExportIntake {
        self.intake.clone()
    }

    /// Close the pipeline's own producer handle and wait for the workers to
    /// drain whatever is queued.
    ///
    /// Workers only stop once every intake clone is gone. Anything still
    /// running after `timeout` is aborted and a `Timeout` error returned.
    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        let Self { intake, workers } = self;
        drop(intake);

        let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();

        match tokio::time::timeout(timeout, futures::future::join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Export worker terminated abnormally");
                    }
                }
                tracing::info!("Export pipeline drained");
                Ok(())
            },
            Err(_) => {
                for handle in &aborts {
                    handle.abort();
                }
                tracing::warn!(timeout = ?timeout, "Export queue not drained in time, workers aborted");
                Err(TallyError::timeout(timeout))
            },
        }
    }
}

struct Worker {
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Metric>>>,
    settings: StatsSettings,
    sink: Arc<dyn Sink>,
    monitor: Arc<Monitor>,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = self.queue.lock().await.recv().await;
            let Some(metric) = next else {
                break;
            };

            match compute_points(&metric, &self.settings) {
                Ok(points) => self.export(&metric, &points).await,
                Err(e) => {
                    self.monitor.record_invariant_violation();
                    tracing::error!(metric = %metric.name, error = %e, "Metric dropped: internal defect");
                },
            }
        }

        tracing::debug!(worker = self.id, "Export worker stopped");
    }

    /// Deliver points one at a time so a failure drops only that point.
    async fn export(&self, metric: &Metric, points: &[DataPoint]) {
        let mut delivered = 0;
        for point in points {
            match self.sink.send(std::slice::from_ref(point)).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    self.monitor.record_export_failure();
                    tracing::warn!(metric = %metric.name, key = %point.key, error = %e, "Data point dropped");
                },
            }
        }

        self.monitor.record_points_exported(delivered);
        tracing::trace!(worker = self.id, metric = %metric.name, delivered, total = points.len(), "Metric exported");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MetricKind;
    use tokio::sync::Semaphore;

    fn flushed(name: &str, kind: MetricKind, value: f64) -> Metric {
        let mut metric = Metric::new(name, kind, value);
        metric.flushed_at = Some(1_000);
        metric
    }

    /// Fails every delivery that carries a key containing `needle`.
    struct PickySink {
        needle: &'static str,
        inner: MemorySink,
    }

    #[async_trait::async_trait]
    impl Sink for PickySink {
        async fn send(&self, points: &[DataPoint]) -> Result<()> {
            if points.iter().any(|p| p.key.contains(self.needle)) {
                return Err(TallyError::sink_write("rejected"));
            }
            self.inner.send(points).await
        }
    }

    /// Holds every batch until a permit is released.
    struct GatedSink {
        gate: Semaphore,
        inner: MemorySink,
    }

    #[async_trait::async_trait]
    impl Sink for GatedSink {
        async fn send(&self, points: &[DataPoint]) -> Result<()> {
            let _permit = self.gate.acquire().await.map_err(|_| TallyError::ChannelSend)?;
            self.inner.send(points).await
        }
    }

    struct StuckSink;

    #[async_trait::async_trait]
    impl Sink for StuckSink {
        async fn send(&self, _points: &[DataPoint]) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[test]
    fn test_queue_capacity() {
        assert_eq!(queue_capacity(10 << 20, 10 << 10), 1024);
        assert_eq!(queue_capacity(100, 1000), 1);
        assert_eq!(queue_capacity(0, 10), 1);
        assert_eq!(queue_capacity(10, 0), 1);
    }

    #[tokio::test]
    async fn test_pipeline_exports_all_metrics() {
        let sink = Arc::new(MemorySink::new());
        let monitor = Arc::new(Monitor::new());
        let pipeline = ExportPipeline::spawn(
            8,
            2,
            StatsSettings::default(),
            Arc::clone(&sink) as Arc<dyn Sink>,
            Arc::clone(&monitor),
        );

        let intake = pipeline.intake();
        assert_eq!(intake.capacity(), 8);
        intake.submit(flushed("cpu", MetricKind::Gauge, 1.0)).await.unwrap();
        intake.submit(flushed("hits", MetricKind::Counter, 10.0)).await.unwrap();
        drop(intake);

        pipeline.shutdown(Duration::from_secs(2)).await.unwrap();

        let mut keys: Vec<String> = sink.points().into_iter().map(|p| p.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["hits", "stats.gauges.cpu.avg_value", "stats.hits", "stats_counts.hits"]);
        assert_eq!(monitor.snapshot().points_exported, 4);
    }

    #[tokio::test]
    async fn test_failed_metric_does_not_stop_others() {
        let sink = Arc::new(PickySink {
            needle: "bad",
            inner: MemorySink::new(),
        });
        let monitor = Arc::new(Monitor::new());
        let pipeline = ExportPipeline::spawn(
            8,
            1,
            StatsSettings::default(),
            Arc::clone(&sink) as Arc<dyn Sink>,
            Arc::clone(&monitor),
        );

        let intake = pipeline.intake();
        intake.submit(flushed("good.a", MetricKind::Gauge, 1.0)).await.unwrap();
        intake.submit(flushed("bad", MetricKind::Gauge, 2.0)).await.unwrap();
        intake.submit(flushed("good.b", MetricKind::Gauge, 3.0)).await.unwrap();
        drop(intake);
        pipeline.shutdown(Duration::from_secs(2)).await.unwrap();

        assert_eq!(sink.inner.points().len(), 2);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.export_failures, 1);
        assert_eq!(snapshot.points_exported, 2);
    }

    #[tokio::test]
    async fn test_invariant_violation_is_counted_and_skipped() {
        let sink = Arc::new(MemorySink::new());
        let monitor = Arc::new(Monitor::new());
        let pipeline = ExportPipeline::spawn(
            4,
            1,
            StatsSettings::default(),
            Arc::clone(&sink) as Arc<dyn Sink>,
            Arc::clone(&monitor),
        );

        let mut broken = flushed("db", MetricKind::Timer, 5.0);
        broken.samples.clear();
        broken.hit_count = 0;

        let intake = pipeline.intake();
        intake.submit(broken).await.unwrap();
        intake.submit(flushed("ok", MetricKind::Gauge, 1.0)).await.unwrap();
        drop(intake);
        pipeline.shutdown(Duration::from_secs(2)).await.unwrap();

        assert_eq!(monitor.snapshot().invariant_violations, 1);
        assert_eq!(sink.points().len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_producer() {
        let sink = Arc::new(GatedSink {
            gate: Semaphore::new(0),
            inner: MemorySink::new(),
        });
        let pipeline = ExportPipeline::spawn(
            1,
            1,
            StatsSettings::default(),
            Arc::clone(&sink) as Arc<dyn Sink>,
            Arc::new(Monitor::new()),
        );
        let intake = pipeline.intake();

        // First metric is held by the worker, second fills the single slot
        intake.submit(flushed("a", MetricKind::Gauge, 1.0)).await.unwrap();
        intake.submit(flushed("b", MetricKind::Gauge, 2.0)).await.unwrap();

        let third = tokio::time::timeout(
            Duration::from_millis(100),
            intake.submit(flushed("c", MetricKind::Gauge, 3.0)),
        )
        .await;
        assert!(third.is_err(), "submit should wait while the queue is full");

        sink.gate.add_permits(10);
        intake.submit(flushed("c", MetricKind::Gauge, 3.0)).await.unwrap();
        drop(intake);
        pipeline.shutdown(Duration::from_secs(2)).await.unwrap();

        assert_eq!(sink.inner.points().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_stuck_workers() {
        let pipeline = ExportPipeline::spawn(
            4,
            1,
            StatsSettings::default(),
            Arc::new(StuckSink),
            Arc::new(Monitor::new()),
        );
        pipeline
            .intake()
            .submit(flushed("x", MetricKind::Gauge, 1.0))
            .await
            .unwrap();

        let err = pipeline.shutdown(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, TallyError::Timeout { timeout_ms: 100 }));
    }

    #[tokio::test]
    async fn test_failed_point_does_not_drop_siblings() {
        let sink = Arc::new(PickySink {
            needle: "stats_counts.",
            inner: MemorySink::new(),
        });
        let monitor = Arc::new(Monitor::new());
        let pipeline = ExportPipeline::spawn(
            4,
            1,
            StatsSettings::default(),
            Arc::clone(&sink) as Arc<dyn Sink>,
            Arc::clone(&monitor),
        );

        let intake = pipeline.intake();
        intake.submit(flushed("orders", MetricKind::Counter, 4.0)).await.unwrap();
        drop(intake);
        pipeline.shutdown(Duration::from_secs(2)).await.unwrap();

        let mut keys: Vec<String> = sink.inner.points().into_iter().map(|p| p.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["orders", "stats.orders"]);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.export_failures, 1);
        assert_eq!(snapshot.points_exported, 2);
    }
}
