use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a metric, fixed by the type token of an update line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Latest value, carried across idle flush intervals (`g`)
    Gauge,
    /// Running total of deltas, cleared every flush (`c`)
    Counter,
    /// Raw samples summarized into percentile statistics (`ms`)
    Timer,
}

impl MetricKind {
    /// Maps a wire type token to a kind
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "g" => Some(MetricKind::Gauge),
            "c" => Some(MetricKind::Counter),
            "ms" => Some(MetricKind::Timer),
            _ => None,
        }
    }

    /// Wire type token for this kind
    pub fn token(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "g",
            MetricKind::Counter => "c",
            MetricKind::Timer => "ms",
        }
    }

    /// Human-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::Timer => "timer",
        }
    }

    /// Whether records of this kind survive a flush
    pub fn is_retained_on_flush(&self) -> bool {
        matches!(self, MetricKind::Gauge)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed ingestion line
#[derive(Debug, Clone, PartialEq)]
pub struct MetricUpdate {
    pub name: String,
    pub value: f64,
    pub kind: MetricKind,
}

impl MetricUpdate {
    pub fn new(name: impl Into<String>, value: f64, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            value,
            kind,
        }
    }
}

/// Aggregation record for one metric name.
///
/// `hit_count` always equals `samples.len()`; both are cleared together
/// when a gauge is reset after a flush.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    /// Metric name, unique per store
    pub name: String,
    /// Kind established by the first update of the current lifecycle
    pub kind: MetricKind,
    /// Updates applied since the last reset
    pub hit_count: usize,
    /// Replaced (gauge, timer) or accumulated (counter) value
    pub last_value: f64,
    /// Raw values in arrival order
    pub samples: Vec<f64>,
    /// Unix seconds of the flush that captured this copy
    pub flushed_at: Option<i64>,
}

impl Metric {
    /// Record created by the first update for a name
    pub fn new(name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            hit_count: 1,
            last_value: value,
            samples: vec![value],
            flushed_at: None,
        }
    }

    /// Applies a subsequent update of the same kind
    pub fn apply(&mut self, value: f64) {
        self.hit_count += 1;
        self.samples.push(value);
        match self.kind {
            MetricKind::Counter => self.last_value += value,
            MetricKind::Gauge | MetricKind::Timer => self.last_value = value,
        }
    }

    /// Clears the interval state but keeps `last_value`
    pub fn reset_interval(&mut self) {
        self.hit_count = 0;
        self.samples.clear();
    }
}

/// One exported point in the backend line protocol
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub key: String,
    pub value: f64,
    pub timestamp: i64,
}

impl DataPoint {
    pub fn new(key: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp,
        }
    }

    /// Plaintext line including the trailing newline
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.6} {}", self.key, self.value, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tokens() {
        assert_eq!(MetricKind::from_token("c"), Some(MetricKind::Counter));
        assert_eq!(MetricKind::from_token("g"), Some(MetricKind::Gauge));
        assert_eq!(MetricKind::from_token("ms"), Some(MetricKind::Timer));
        assert_eq!(MetricKind::from_token("x"), None);
        assert_eq!(MetricKind::from_token("C"), None);

        for kind in [MetricKind::Gauge, MetricKind::Counter, MetricKind::Timer] {
            assert_eq!(MetricKind::from_token(kind.token()), Some(kind));
        }
    }

    #[test]
    fn test_counter_apply_accumulates() {
        let mut metric = Metric::new("x", MetricKind::Counter, 3.0);
        metric.apply(4.0);
        metric.apply(-2.0);

        assert_eq!(metric.last_value, 5.0);
        assert_eq!(metric.hit_count, 3);
        assert_eq!(metric.samples, vec![3.0, 4.0, -2.0]);
    }

    #[test]
    fn test_gauge_and_timer_apply_replace() {
        let mut gauge = Metric::new("g", MetricKind::Gauge, 10.0);
        gauge.apply(2.0);
        assert_eq!(gauge.last_value, 2.0);

        let mut timer = Metric::new("t", MetricKind::Timer, 120.0);
        timer.apply(80.0);
        assert_eq!(timer.last_value, 80.0);
        assert_eq!(timer.samples, vec![120.0, 80.0]);
    }

    #[test]
    fn test_reset_interval_keeps_last_value() {
        let mut gauge = Metric::new("g", MetricKind::Gauge, 10.0);
        gauge.apply(7.5);
        gauge.reset_interval();

        assert_eq!(gauge.hit_count, 0);
        assert!(gauge.samples.is_empty());
        assert_eq!(gauge.last_value, 7.5);
    }

    #[test]
    fn test_data_point_line_format() {
        let point = DataPoint::new("stats.gauges.cpu.avg_value", 0.5, 1_700_000_000);
        assert_eq!(point.to_line(), "stats.gauges.cpu.avg_value 0.500000 1700000000\n");

        let negative = DataPoint::new("stats_counts.jobs", -3.0, 42);
        assert_eq!(negative.to_string(), "stats_counts.jobs -3.000000 42");
    }
}
