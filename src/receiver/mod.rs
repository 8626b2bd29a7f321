//! Ingestion front end.
//!
//! Accepts TCP clients (and optionally UDP datagrams), splits their input
//! into lines and feeds each one through the parser into the store. A bad
//! line is logged and counted; it never affects other lines or clients.

mod session;

pub use session::LINE_TOO_LONG;

use crate::core::config::ServerConfig;
use crate::core::{MetricKind, Result, TallyError};
use crate::metrics::{MetricStore, SetOutcome};
use crate::monitoring::Monitor;
use crate::protocol::parse_line;
use session::Session;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

const MAX_DATAGRAM_BYTES: usize = 65_535;

/// What happened to one raw line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Blank after trimming
    Skipped,
    /// Applied to the store
    Applied,
    /// Dropped because the name is live with another kind
    KindConflict { existing: MetricKind },
    /// Rejected before reaching the store
    Rejected { category: &'static str },
}

/// Parses raw lines and applies them to the store.
#[derive(Debug)]
pub struct LineHandler {
    store: Arc<MetricStore>,
    monitor: Arc<Monitor>,
}

impl LineHandler {
    pub fn new(store: Arc<MetricStore>, monitor: Arc<Monitor>) -> Self {
        Self { store, monitor }
    }

    /// Handle one raw line from `peer`.
    ///
    /// The line terminator and trailing whitespace or NUL padding are
    /// stripped first. Leading bytes belong to the name and are kept.
    pub fn handle(&self, raw: &[u8], peer: SocketAddr) -> LineOutcome {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(_) => {
                let err = TallyError::malformed(String::from_utf8_lossy(raw));
                return self.reject_with(&err, peer);
            },
        };

        let line = text.trim_end_matches(|c: char| c.is_whitespace() || c == '\0');
        if line.is_empty() {
            return LineOutcome::Skipped;
        }

        let update = match parse_line(line) {
            Ok(update) => update,
            Err(e) => return self.reject_with(&e, peer),
        };

        match self.store.set(&update.name, update.kind, update.value) {
            SetOutcome::Rejected { existing } => {
                self.monitor.record_kind_conflict();
                tracing::warn!(
                    peer = %peer,
                    metric = %update.name,
                    existing = %existing,
                    received = %update.kind,
                    "Update dropped: metric already has another kind"
                );
                LineOutcome::KindConflict { existing }
            },
            SetOutcome::Created | SetOutcome::Updated => {
                self.monitor.record_line_accepted();
                tracing::trace!(peer = %peer, metric = %update.name, value = update.value, "Line applied");
                LineOutcome::Applied
            },
        }
    }

    /// Count and log a line rejected before parsing
    pub fn reject(&self, category: &'static str, peer: SocketAddr) -> LineOutcome {
        self.monitor.record_rejection(category);
        tracing::warn!(peer = %peer, reason = category, "Line rejected");
        LineOutcome::Rejected { category }
    }

    fn reject_with(&self, error: &TallyError, peer: SocketAddr) -> LineOutcome {
        self.monitor.record_line_rejected(error);
        tracing::warn!(peer = %peer, error = %error, "Line rejected");
        LineOutcome::Rejected {
            category: error.category(),
        }
    }
}

/// Resolves once shutdown is signalled or the signal sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Bound listeners plus the state shared by every session
pub struct IngestServer {
    listener: TcpListener,
    udp: Option<UdpSocket>,
    handler: Arc<LineHandler>,
    sessions: Arc<Semaphore>,
    max_line_bytes: usize,
    monitor: Arc<Monitor>,
}

impl IngestServer {
    /// Bind the TCP listener, plus a UDP socket on the same address when
    /// enabled.
    pub async fn bind(config: &ServerConfig, store: Arc<MetricStore>, monitor: Arc<Monitor>) -> Result<Self> {
        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| TallyError::connection(format!("failed to bind {address}: {e}")))?;
        let local = listener.local_addr()?;

        let udp = if config.udp {
            let socket = UdpSocket::bind(local)
                .await
                .map_err(|e| TallyError::connection(format!("failed to bind udp {local}: {e}")))?;
            Some(socket)
        } else {
            None
        };

        tracing::info!(addr = %local, udp = config.udp, "Ingestion listener bound");

        Ok(Self {
            listener,
            udp,
            handler: Arc::new(LineHandler::new(store, Arc::clone(&monitor))),
            sessions: Arc::new(Semaphore::new(config.max_connections)),
            max_line_bytes: config.max_line_bytes,
            monitor,
        })
    }

    /// Bound TCP address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Bound UDP address, if datagrams are enabled
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref().and_then(|socket| socket.local_addr().ok())
    }

    /// Serve clients until shutdown, then wait for open sessions to close.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Self {
            listener,
            udp,
            handler,
            sessions: slots,
            max_line_bytes,
            monitor,
        } = self;

        let mut tasks = JoinSet::new();

        if let Some(socket) = udp {
            tasks.spawn(run_udp(socket, Arc::clone(&handler), max_line_bytes, shutdown.clone()));
        }

        loop {
            while tasks.try_join_next().is_some() {}

            let permit = tokio::select! {
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                () = shutdown_requested(&mut shutdown) => break,
            };

            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                },
                () = shutdown_requested(&mut shutdown) => break,
            };

            monitor.record_connection_opened();
            tracing::debug!(peer = %peer, "Client connected");

            let session = Session::new(stream, peer, Arc::clone(&handler), max_line_bytes);
            let session_shutdown = shutdown.clone();
            let session_monitor = Arc::clone(&monitor);
            tasks.spawn(async move {
                let result = session.run(session_shutdown).await;
                if let Err(e) = &result {
                    tracing::warn!(peer = %peer, error = %e, "Session ended with error");
                }
                session_monitor.record_connection_closed(result.is_err());
                drop(permit);
            });
        }

        tracing::info!("Ingestion listener stopping");
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Ingestion task terminated abnormally");
            }
        }
    }
}

async fn run_udp(socket: UdpSocket, handler: Arc<LineHandler>, max_line_bytes: usize, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];

    loop {
        let (len, peer) = tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "Datagram receive failed");
                    continue;
                }
            },
            () = shutdown_requested(&mut shutdown) => break,
        };

        for line in buf[..len].split(|b| *b == b'\n') {
            if line.len() > max_line_bytes {
                handler.reject(LINE_TOO_LONG, peer);
            } else {
                handler.handle(line, peer);
            }
        }
    }

    tracing::debug!("Datagram listener stopped");
}
