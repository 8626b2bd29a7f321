//! Periodic flush: snapshot the store and feed the export queue.

use crate::core::Result;
use crate::export::ExportIntake;
use crate::metrics::MetricStore;
use crate::monitoring::Monitor;
use crate::receiver::shutdown_requested;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

/// Timer loop driving `snapshot_and_reset` every interval.
pub struct FlushScheduler {
    store: Arc<MetricStore>,
    intake: ExportIntake,
    interval: Duration,
    monitor: Arc<Monitor>,
    flush_on_shutdown: bool,
    final_flush_timeout: Duration,
}

impl FlushScheduler {
    pub fn new(
        store: Arc<MetricStore>,
        intake: ExportIntake,
        interval: Duration,
        monitor: Arc<Monitor>,
        flush_on_shutdown: bool,
    ) -> Self {
        Self {
            store,
            intake,
            interval,
            monitor,
            flush_on_shutdown,
            final_flush_timeout: Duration::from_secs(5),
        }
    }

    /// Upper bound on how long the final flush may wait for queue space
    pub fn with_final_flush_timeout(mut self, timeout: Duration) -> Self {
        self.final_flush_timeout = timeout;
        self
    }

    /// Run one flush cycle and return the number of metrics submitted.
    ///
    /// Every metric of the snapshot carries the same unix timestamp. Blocks
    /// while the export queue is full.
    pub async fn flush_once(&self) -> Result<usize> {
        self.flush_until(std::future::pending::<()>()).await
    }

    /// Flush cycle that stops submitting once `cancel` resolves.
    ///
    /// The snapshot has already been taken from the store at that point, so
    /// whatever was not queued yet is counted as abandoned.
    async fn flush_until(&self, cancel: impl Future<Output = ()>) -> Result<usize> {
        tokio::pin!(cancel);

        let flushed_at = chrono::Utc::now().timestamp();
        let snapshot = self.store.snapshot_and_reset(flushed_at);
        let count = snapshot.len();
        let mut submitted = 0;

        for metric in snapshot {
            tokio::select! {
                biased;
                () = &mut cancel => break,
                sent = self.intake.submit(metric) => {
                    sent?;
                    submitted += 1;
                }
            }
        }

        if submitted < count {
            let abandoned = count - submitted;
            self.monitor.record_metrics_abandoned(abandoned);
            tracing::warn!(submitted, abandoned, flushed_at, "Flush cut short, remaining metrics abandoned");
        }

        self.monitor.record_flush(submitted);
        tracing::debug!(metrics = submitted, flushed_at, "Flush cycle complete");
        self.monitor.log_summary();
        Ok(submitted)
    }

    /// Flush every interval until `shutdown` flips to true.
    ///
    /// The first flush happens one full interval after start. A slow cycle
    /// delays the following ticks rather than bunching them up. A cycle
    /// blocked on a full export queue is cut short by the shutdown signal,
    /// and the final flush gives up after `final_flush_timeout`. The intake
    /// handle is released on return so the export workers can drain.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval = ?self.interval, "Flush scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.flush_until(shutdown_requested(&mut shutdown)).await {
                        tracing::error!(error = %e, "Flush cycle failed");
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if self.flush_on_shutdown {
            match self.flush_until(tokio::time::sleep(self.final_flush_timeout)).await {
                Ok(count) => tracing::info!(metrics = count, "Final flush submitted"),
                Err(e) => tracing::warn!(error = %e, "Final flush failed"),
            }
        }

        tracing::info!("Flush scheduler stopped");
    }
}
