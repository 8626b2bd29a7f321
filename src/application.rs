//! Daemon wiring: store, ingestion, flush scheduler and export pipeline.

use crate::core::{Config, Result};
use crate::export::{queue_capacity, ExportPipeline, GraphiteSink, Sink};
use crate::flush::FlushScheduler;
use crate::metrics::MetricStore;
use crate::monitoring::Monitor;
use crate::receiver::IngestServer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Extra time granted to the scheduler beyond its own final flush bound.
const FLUSHER_GRACE: Duration = Duration::from_secs(1);

/// Main application struct that owns every shared component of tallyd.
pub struct Application {
    config: Config,
    store: Arc<MetricStore>,
    monitor: Arc<Monitor>,
    sink: Arc<dyn Sink>,
}

impl Application {
    /// Create an application exporting to the configured Graphite backend.
    pub fn new(config: Config) -> Result<Self> {
        let sink = GraphiteSink::new(
            config.backend_address(),
            config.backend.connect_timeout,
            config.backend.write_timeout,
        );
        Self::with_sink(config, Arc::new(sink))
    }

    /// Create an application exporting to a caller-provided sink.
    pub fn with_sink(config: Config, sink: Arc<dyn Sink>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store: Arc::new(MetricStore::new()),
            monitor: Arc::new(Monitor::new()),
            sink,
        })
    }

    /// Shared metric store
    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// Shared monitor
    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Bind the listener and start every background task.
    pub async fn start(self) -> Result<RunningApplication> {
        let Self {
            config,
            store,
            monitor,
            sink,
        } = self;

        let server = IngestServer::bind(&config.server, Arc::clone(&store), Arc::clone(&monitor)).await?;
        let ingest_addr = server.local_addr()?;
        let udp_addr = server.udp_addr();

        let pipeline = ExportPipeline::spawn(
            queue_capacity(config.export.memory_budget_bytes, config.export.average_item_bytes),
            config.export.workers,
            config.stats_settings(),
            sink,
            Arc::clone(&monitor),
        );

        let scheduler = FlushScheduler::new(
            Arc::clone(&store),
            pipeline.intake(),
            config.flush.interval,
            Arc::clone(&monitor),
            config.flush.flush_on_shutdown,
        )
        .with_final_flush_timeout(config.export.shutdown_timeout);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ingest = tokio::spawn(server.run(shutdown_rx.clone()));
        let flusher = tokio::spawn(scheduler.run(shutdown_rx));

        tracing::info!(
            listen = %ingest_addr,
            backend = %config.backend_address(),
            interval = ?config.flush.interval,
            percentile = config.flush.percentile,
            "tallyd started"
        );

        Ok(RunningApplication {
            ingest_addr,
            udp_addr,
            shutdown_tx,
            ingest,
            flusher,
            pipeline,
            shutdown_timeout: config.export.shutdown_timeout,
            store,
            monitor,
        })
    }

    /// Run until Ctrl-C, then shut down cleanly.
    pub async fn run(self) -> Result<()> {
        let running = self.start().await?;

        tokio::signal::ctrl_c().await?;
        tracing::info!("Received shutdown signal, stopping...");

        running.shutdown().await
    }
}

/// Handle onto a started daemon
pub struct RunningApplication {
    ingest_addr: SocketAddr,
    udp_addr: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    ingest: JoinHandle<()>,
    flusher: JoinHandle<()>,
    pipeline: ExportPipeline,
    shutdown_timeout: Duration,
    store: Arc<MetricStore>,
    monitor: Arc<Monitor>,
}

impl RunningApplication {
    /// Bound TCP ingestion address
    pub fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    /// Bound UDP ingestion address, if enabled
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Stop ingestion and the scheduler (which runs its final flush), then
    /// give the export queue `export.shutdown_timeout` to drain.
    ///
    /// The final flush and the drain are each bounded by that timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown_tx.send_replace(true);

        self.ingest.await?;

        let flusher_timeout = self.shutdown_timeout + FLUSHER_GRACE;
        match tokio::time::timeout(flusher_timeout, &mut self.flusher).await {
            Ok(joined) => joined?,
            Err(_) => {
                self.flusher.abort();
                tracing::warn!(timeout = ?flusher_timeout, "Flush scheduler did not stop in time, aborted");
            },
        }

        let result = self.pipeline.shutdown(self.shutdown_timeout).await;

        let snapshot = self.monitor.snapshot();
        tracing::info!(
            lines_accepted = snapshot.lines_accepted,
            lines_rejected = snapshot.lines_rejected,
            points_exported = snapshot.points_exported,
            export_failures = snapshot.export_failures,
            metrics_abandoned = snapshot.metrics_abandoned,
            "tallyd stopped"
        );

        result
    }
}
