//! Metric aggregation: the concurrent store and the statistics engine.

pub mod stats;
pub mod store;

pub use stats::{compute_points, summarize_timer, StatsSettings, TimerSummary};
pub use store::{MetricStore, SetOutcome};
