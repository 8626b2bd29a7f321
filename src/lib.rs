//! tallyd - line-protocol metrics aggregation daemon.
//!
//! Clients stream `name:value|type` lines over TCP (or UDP). Updates are
//! aggregated in memory and, every flush interval, summarized into
//! Graphite plaintext points and written to a backend.
//!
//! # Architecture
//!
//! - `receiver`: TCP/UDP ingestion, one session task per client
//! - `protocol`: line parser
//! - `metrics`: concurrent store and the statistics engine
//! - `flush`: periodic snapshot of the store
//! - `export`: bounded queue, worker pool and sinks
//! - `core`: domain types, errors and configuration
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use tallyd_lib::core::Config;
//! use tallyd_lib::Application;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let app = Application::new(config)?;
//!     app.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod application;
pub mod cli;
pub mod core;
pub mod export;
pub mod flush;
pub mod metrics;
pub mod monitoring;
pub mod protocol;
pub mod receiver;

pub use crate::application::{Application, RunningApplication};
pub use crate::core::{Config, Result};
