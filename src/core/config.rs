//! Configuration management for tallyd.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI and environment overrides applied through [`ConfigBuilder`]
//! - Validation and defaults

use crate::core::{Result, TallyError};
use crate::metrics::stats::StatsSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete configuration for tallyd
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ingestion listener configuration
    pub server: ServerConfig,
    /// Downstream line-protocol backend
    pub backend: BackendConfig,
    /// Flush cadence and statistics
    pub flush: FlushConfig,
    /// Export queue and workers
    pub export: ExportConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode (forces trace logging)
    pub debug: bool,
}

/// Ingestion listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port, 0 picks an ephemeral port
    pub port: u16,
    /// Also accept datagrams on the same address
    pub udp: bool,
    /// Maximum concurrent TCP sessions
    pub max_connections: usize,
    /// Lines longer than this are discarded
    pub max_line_bytes: usize,
}

/// Backend (sink) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

/// Flush configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Period between two snapshots of the store
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Timer percentile window, 0 to 100
    pub percentile: u8,
    /// Run one last flush when shutting down
    pub flush_on_shutdown: bool,
}

/// Export pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Number of export workers draining the queue
    pub workers: usize,
    /// Memory the export queue may use
    pub memory_budget_bytes: usize,
    /// Estimated memory cost of one queued metric
    pub average_item_bytes: usize,
    /// How long shutdown waits for the queue to drain
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets, thread ids and line numbers
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            flush: FlushConfig::default(),
            export: ExportConfig::default(),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "localhost".to_string(),
            port: 8125,
            udp: false,
            max_connections: 1024,
            max_line_bytes: 8192,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            host: "localhost".to_string(),
            port: 5001,
            connect_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        FlushConfig {
            interval: Duration::from_secs(10),
            percentile: 90,
            flush_on_shutdown: true,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            workers: 4,
            memory_budget_bytes: 10 << 20, // 10 MiB
            average_item_bytes: 10 << 10,  // 10 KiB
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(TallyError::config("server.host must not be empty"));
        }

        if self.server.max_connections == 0 {
            return Err(TallyError::config("server.max_connections must be greater than 0"));
        }

        if self.server.max_line_bytes < 16 {
            return Err(TallyError::config(format!(
                "server.max_line_bytes must be at least 16, got {}",
                self.server.max_line_bytes
            )));
        }

        if self.backend.host.trim().is_empty() {
            return Err(TallyError::config("backend.host must not be empty"));
        }

        if self.backend.port == 0 {
            return Err(TallyError::config("backend.port must be greater than 0"));
        }

        if self.backend.connect_timeout.is_zero() || self.backend.write_timeout.is_zero() {
            return Err(TallyError::config("backend timeouts must be greater than 0"));
        }

        if self.flush.interval.is_zero() {
            return Err(TallyError::config("flush.interval must be greater than 0"));
        }

        if self.flush.percentile > 100 {
            return Err(TallyError::config(format!(
                "flush.percentile must be between 0 and 100, got {}",
                self.flush.percentile
            )));
        }

        if self.export.workers == 0 {
            return Err(TallyError::config("export.workers must be greater than 0"));
        }

        if self.export.memory_budget_bytes == 0 || self.export.average_item_bytes == 0 {
            return Err(TallyError::config(
                "export.memory_budget_bytes and export.average_item_bytes must be greater than 0",
            ));
        }

        if self.export.shutdown_timeout.is_zero() {
            return Err(TallyError::config("export.shutdown_timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Ingestion listen address as `host:port`
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Backend address as `host:port`
    pub fn backend_address(&self) -> String {
        format!("{}:{}", self.backend.host, self.backend.port)
    }

    /// Statistics parameters handed to the export workers
    pub fn stats_settings(&self) -> StatsSettings {
        StatsSettings::new(self.flush.percentile, self.flush.interval)
    }

    /// Effective tracing filter directive
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            LogLevel::Trace.as_str()
        } else {
            self.logging.level.as_str()
        }
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| TallyError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set listen host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    /// Set listen port
    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Enable datagram ingestion
    pub fn udp(mut self, enable: bool) -> Self {
        self.config.server.udp = enable;
        self
    }

    /// Set backend host
    pub fn backend_host(mut self, host: impl Into<String>) -> Self {
        self.config.backend.host = host.into();
        self
    }

    /// Set backend port
    pub fn backend_port(mut self, port: u16) -> Self {
        self.config.backend.port = port;
        self
    }

    /// Set flush interval
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush.interval = interval;
        self
    }

    /// Set timer percentile
    pub fn percentile(mut self, percentile: u8) -> Self {
        self.config.flush.percentile = percentile;
        self
    }

    /// Set number of export workers
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.export.workers = workers;
        self
    }

    /// Set debug mode, never clearing a debug flag set by the file
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug |= debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
