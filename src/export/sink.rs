//! Downstream sinks for computed data points.

use crate::core::{DataPoint, Result, TallyError};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Destination for computed data points.
///
/// An error means none of the points in that call should be assumed
/// delivered. The export workers hand over one point per call, so a
/// failure costs exactly that point.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Deliver a batch of points.
    async fn send(&self, points: &[DataPoint]) -> Result<()>;
}

/// Graphite plaintext sink: `<key> <value> <unix_seconds>\n` over TCP.
///
/// Opens a fresh connection per call so a restarted backend is picked up
/// without any reconnect bookkeeping. Connecting and writing are each
/// bounded by their own timeout.
#[derive(Debug, Clone)]
pub struct GraphiteSink {
    address: String,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl GraphiteSink {
    pub fn new(address: impl Into<String>, connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            write_timeout,
        }
    }

    /// Backend address as `host:port`
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<TcpStream> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(TallyError::SinkUnreachable {
                addr: self.address.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(TallyError::SinkUnreachable {
                addr: self.address.clone(),
                reason: format!("connect timed out after {:?}", self.connect_timeout),
            }),
        }
    }
}

#[async_trait::async_trait]
impl Sink for GraphiteSink {
    async fn send(&self, points: &[DataPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let payload: String = points.iter().map(DataPoint::to_line).collect();
        let mut stream = self.connect().await?;

        let write = async {
            stream.write_all(payload.as_bytes()).await?;
            stream.shutdown().await
        };

        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => {
                tracing::trace!(addr = %self.address, points = points.len(), "Points written");
                Ok(())
            },
            Ok(Err(e)) => Err(TallyError::sink_write(format!("{}: {}", self.address, e))),
            Err(_) => Err(TallyError::timeout(self.write_timeout)),
        }
    }
}

/// In-memory sink that records every point it receives.
#[derive(Debug, Default)]
pub struct MemorySink {
    points: Mutex<Vec<DataPoint>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all points received so far
    pub fn points(&self) -> Vec<DataPoint> {
        self.points.lock().clone()
    }

    /// Drain the recorded points
    pub fn take(&self) -> Vec<DataPoint> {
        std::mem::take(&mut *self.points.lock())
    }
}

#[async_trait::async_trait]
impl Sink for MemorySink {
    async fn send(&self, points: &[DataPoint]) -> Result<()> {
        self.points.lock().extend_from_slice(points);
        Ok(())
    }
}
