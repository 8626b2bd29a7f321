//! Core domain types, configuration and errors for tallyd.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, LogLevel};
pub use error::{Result, TallyError};
pub use types::{DataPoint, Metric, MetricKind, MetricUpdate};
