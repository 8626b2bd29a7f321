//! Command-line interface for tallyd.
//!
//! Settings resolve in this order, highest first: command-line flags,
//! `TALLYD_*` environment variables, the YAML config file, defaults.

use crate::application::Application;
use crate::core::config::ConfigBuilder;
use crate::core::{Config, Result, TallyError};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Line-protocol metrics aggregation daemon
#[derive(Parser, Debug)]
#[command(name = "tallyd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/tallyd/config.yaml)
    #[arg(short, long, env = "TALLYD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen host for metric lines
    #[arg(long, env = "TALLYD_HOST")]
    pub host: Option<String>,

    /// Listen port for metric lines
    #[arg(short, long, env = "TALLYD_PORT")]
    pub port: Option<u16>,

    /// Also accept metric lines over UDP
    #[arg(long, env = "TALLYD_UDP")]
    pub udp: bool,

    /// Graphite backend host
    #[arg(long, env = "TALLYD_BACKEND_HOST")]
    pub backend_host: Option<String>,

    /// Graphite backend port
    #[arg(long, env = "TALLYD_BACKEND_PORT")]
    pub backend_port: Option<u16>,

    /// Flush interval, e.g. "10s" or "1m"
    #[arg(long, env = "TALLYD_FLUSH_INTERVAL", value_parser = parse_duration)]
    pub flush_interval: Option<Duration>,

    /// Timer percentile window
    #[arg(long, env = "TALLYD_PERCENTILE", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub percentile: Option<u8>,

    /// Number of export workers
    #[arg(long, env = "TALLYD_WORKERS")]
    pub workers: Option<usize>,

    /// Enable trace logging
    #[arg(short, long, env = "TALLYD_DEBUG")]
    pub debug: bool,

    /// Validate configuration, print it and exit
    #[arg(long)]
    pub check_config: bool,
}

fn parse_duration(value: &str) -> std::result::Result<Duration, humantime_serde::re::humantime::DurationError> {
    humantime_serde::re::humantime::parse_duration(value)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tallyd").join("config.yaml"))
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Resolve the effective configuration.
    ///
    /// An explicitly named file must exist and parse; the default location
    /// is only read when present.
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let path = match &self.config {
            Some(path) => Some(path.clone()),
            None => default_config_path().filter(|path| path.exists()),
        };

        if let Some(path) = path {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| TallyError::config(format!("Failed to read config file {}: {}", path.display(), e)))?;
            builder = builder.from_yaml(&content)?;
        }

        self.apply_overrides(builder).build()
    }

    fn apply_overrides(&self, mut builder: ConfigBuilder) -> ConfigBuilder {
        if let Some(host) = &self.host {
            builder = builder.host(host.as_str());
        }
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if self.udp {
            builder = builder.udp(true);
        }
        if let Some(host) = &self.backend_host {
            builder = builder.backend_host(host.as_str());
        }
        if let Some(port) = self.backend_port {
            builder = builder.backend_port(port);
        }
        if let Some(interval) = self.flush_interval {
            builder = builder.flush_interval(interval);
        }
        if let Some(percentile) = self.percentile {
            builder = builder.percentile(percentile);
        }
        if let Some(workers) = self.workers {
            builder = builder.workers(workers);
        }

        builder.debug(self.debug)
    }

    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` wins over the configured level.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter()));

        let fmt_layer = if config.logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TallyError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute tallyd.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;

    if cli.check_config {
        let rendered = serde_yaml::to_string(&config)
            .map_err(|e| TallyError::config(format!("Failed to render config: {}", e)))?;
        println!("Configuration is valid!");
        print!("{rendered}");
        return Ok(());
    }

    cli.init_logging(&config)?;
    if let Some(path) = &cli.config {
        tracing::info!(path = %path.display(), "Loaded configuration");
    }

    Application::new(config)?.run().await
}
