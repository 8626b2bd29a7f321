use thiserror::Error;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Malformed line: {0}")]
    MalformedLine(String),

    #[error("Unknown metric type: '{0}'")]
    UnknownMetricType(String),

    #[error("Invalid metric value: '{0}'")]
    InvalidValue(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Sink unreachable at {addr}: {reason}")]
    SinkUnreachable { addr: String, reason: String },

    #[error("Sink write failure: {0}")]
    SinkWrite(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal invariant violated: {0}")]
    Invariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Channel send error")]
    ChannelSend,

    #[error("Timeout error: operation took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Result type alias for tallyd operations
pub type Result<T> = std::result::Result<T, TallyError>;

impl TallyError {
    /// Creates a new malformed line error
    pub fn malformed<S: Into<String>>(line: S) -> Self {
        Self::MalformedLine(line.into())
    }

    /// Creates a new connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new sink write error
    pub fn sink_write<S: Into<String>>(msg: S) -> Self {
        Self::SinkWrite(msg.into())
    }

    /// Creates a new invariant violation
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Self::Invariant(msg.into())
    }

    /// Timeout from a duration budget
    pub fn timeout(budget: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns true if the daemon keeps running after this error.
    ///
    /// Configuration problems and broken invariants are the only
    /// failures that are not absorbed at the line, connection or
    /// export-attempt level.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Invariant(_))
    }

    /// Returns true for per-line ingestion failures
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedLine(_) | Self::UnknownMetricType(_) | Self::InvalidValue(_)
        )
    }

    /// Returns the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::MalformedLine(_) => "malformed_line",
            Self::UnknownMetricType(_) => "unknown_type",
            Self::InvalidValue(_) => "invalid_value",
            Self::Connection(_) => "connection",
            Self::SinkUnreachable { .. } => "sink_unreachable",
            Self::SinkWrite(_) => "sink_write",
            Self::Config(_) => "config",
            Self::Invariant(_) => "invariant",
            Self::Io(_) => "io",
            Self::Join(_) => "async",
            Self::ChannelSend => "channel",
            Self::Timeout { .. } => "timeout",
        }
    }
}
