//! Statistics engine: turns a flushed metric into exportable data points.
//!
//! Key layout:
//! - gauge: `stats.gauges.<name>.avg_value`
//! - counter: `stats.<name>` (per second), `stats_counts.<name>`, `<name>`
//! - timer: `<name>`, then `stats.timers.<name>.{avg_value, max_value,
//!   min_value, mean_<P>, upper_<P>, sum_<P>}`

use crate::core::{DataPoint, Metric, MetricKind, Result, TallyError};
use std::time::Duration;

const GAUGE_PREFIX: &str = "stats.gauges";
const RATE_PREFIX: &str = "stats";
const COUNT_PREFIX: &str = "stats_counts";
const TIMER_PREFIX: &str = "stats.timers";

/// Parameters that shape the exported statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSettings {
    /// Percentile window for timers, 0 to 100
    pub percentile: u8,
    /// Flush period used to turn counter totals into rates
    pub flush_interval: Duration,
}

impl StatsSettings {
    pub fn new(percentile: u8, flush_interval: Duration) -> Self {
        Self {
            percentile: percentile.min(100),
            flush_interval,
        }
    }
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self::new(90, Duration::from_secs(10))
    }
}

/// Summary of one timer's samples for a flush interval
#[derive(Debug, Clone, PartialEq)]
pub struct TimerSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub avg: f64,
    /// Samples inside the percentile window, always in `1..=count`
    pub threshold_count: usize,
    /// Largest sample inside the window
    pub upper: f64,
    /// Sum of the samples inside the window
    pub sum_at_threshold: f64,
    /// Mean of the samples inside the window
    pub mean_at_threshold: f64,
}

/// Number of sorted samples that fall in the `percentile` window.
///
/// `threshold_index = floor(((100 - P) / 100) * count + 0.5)` samples are
/// cut from the top; the result is clamped to `1..=count` so `P = 0` and
/// tiny sample sets still yield the lowest sample.
pub fn threshold_count(count: usize, percentile: u8) -> usize {
    if count == 0 {
        return 0;
    }
    let outside = f64::from(100 - percentile.min(100)) / 100.0;
    let threshold_index = (outside * count as f64 + 0.5).floor() as usize;
    count.saturating_sub(threshold_index).clamp(1, count)
}

/// Summarize timer samples; an empty sample set is an invariant violation.
pub fn summarize_timer(samples: &[f64], percentile: u8) -> Result<TimerSummary> {
    if samples.is_empty() {
        return Err(TallyError::invariant("timer flushed without samples"));
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let cumulative: Vec<f64> = sorted
        .iter()
        .scan(0.0, |running, value| {
            *running += value;
            Some(*running)
        })
        .collect();

    let count = sorted.len();
    let sum = cumulative[count - 1];
    let in_window = threshold_count(count, percentile);
    let sum_at_threshold = cumulative[in_window - 1];

    Ok(TimerSummary {
        count,
        min: sorted[0],
        max: sorted[count - 1],
        sum,
        avg: sum / count as f64,
        threshold_count: in_window,
        upper: sorted[in_window - 1],
        sum_at_threshold,
        mean_at_threshold: sum_at_threshold / in_window as f64,
    })
}

/// Compute every data point for one captured metric.
///
/// Pure: the metric is only read, so calling it twice on the same
/// snapshot yields identical points.
pub fn compute_points(metric: &Metric, settings: &StatsSettings) -> Result<Vec<DataPoint>> {
    let timestamp = metric.flushed_at.ok_or_else(|| {
        TallyError::invariant(format!("metric '{}' exported without a flush timestamp", metric.name))
    })?;

    if metric.hit_count != metric.samples.len() {
        return Err(TallyError::invariant(format!(
            "metric '{}' has {} hits but {} samples",
            metric.name,
            metric.hit_count,
            metric.samples.len()
        )));
    }

    let name = metric.name.as_str();
    let point = |key: String, value: f64| DataPoint::new(key, value, timestamp);

    let points = match metric.kind {
        MetricKind::Gauge => {
            vec![point(format!("{GAUGE_PREFIX}.{name}.avg_value"), metric.last_value)]
        },
        MetricKind::Counter => {
            let per_second = metric.last_value / settings.flush_interval.as_secs_f64();
            vec![
                point(format!("{RATE_PREFIX}.{name}"), per_second),
                point(format!("{COUNT_PREFIX}.{name}"), metric.last_value),
                point(name.to_string(), metric.last_value),
            ]
        },
        MetricKind::Timer => {
            let summary = summarize_timer(&metric.samples, settings.percentile)?;
            let p = settings.percentile;
            vec![
                point(name.to_string(), metric.last_value),
                point(format!("{TIMER_PREFIX}.{name}.avg_value"), summary.avg),
                point(format!("{TIMER_PREFIX}.{name}.max_value"), summary.max),
                point(format!("{TIMER_PREFIX}.{name}.min_value"), summary.min),
                point(format!("{TIMER_PREFIX}.{name}.mean_{p}"), summary.mean_at_threshold),
                point(format!("{TIMER_PREFIX}.{name}.upper_{p}"), summary.upper),
                point(format!("{TIMER_PREFIX}.{name}.sum_{p}"), summary.sum_at_threshold),
            ]
        },
    };

    Ok(points)
}
