//! Per-execution metric capture and time-to-target computation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::objective::ObjectiveDirection;

/// Name of the series fed by [`crate::RunContext::report`].
pub const OBJECTIVE_METRIC: &str = "objective";

/// Ordered samples of one metric keyed by elapsed time.
pub type MetricSeries = BTreeMap<Duration, f64>;

/// How observation timestamps are produced.
///
/// `Logical` stamps the n-th observation at `n` nanoseconds, which makes the
/// whole series reproducible across runs; `WallClock` uses real elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClockMode {
    #[default]
    WallClock,
    Logical,
}

/// Collects metric observations for a single algorithm execution.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    clock: ClockMode,
    started: Instant,
    ticks: u64,
    series: BTreeMap<String, MetricSeries>,
}

impl MetricsCollector {
    pub fn new(clock: ClockMode) -> Self {
        Self {
            clock,
            started: Instant::now(),
            ticks: 0,
            series: BTreeMap::new(),
        }
    }

    pub fn clock(&self) -> ClockMode {
        self.clock
    }

    pub fn elapsed(&self) -> Duration {
        match self.clock {
            ClockMode::WallClock => self.started.elapsed(),
            ClockMode::Logical => Duration::from_nanos(self.ticks),
        }
    }

    /// Record `value` at the current elapsed time.
    pub fn record(&mut self, metric: &str, value: f64) {
        if self.clock == ClockMode::Logical {
            self.ticks += 1;
        }
        let at = self.elapsed();
        self.record_at(metric, at, value);
    }

    /// Record `value` at an explicit timestamp; a repeated timestamp keeps the
    /// most recent value.
    pub fn record_at(&mut self, metric: &str, at: Duration, value: f64) {
        self.series
            .entry(metric.to_string())
            .or_default()
            .insert(at, value);
    }

    pub fn series(&self, metric: &str) -> Option<&MetricSeries> {
        self.series.get(metric)
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(BTreeMap::is_empty)
    }

    pub fn into_series(self) -> BTreeMap<String, MetricSeries> {
        self.series
    }
}

/// Elapsed time at which a run first met its target, or the unreached sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeToTarget {
    Reached(Duration),
    Unreached,
}

impl TimeToTarget {
    /// First timestamp whose value is at least as good as `target`.
    pub fn compute(series: &MetricSeries, target: f64, direction: ObjectiveDirection) -> Self {
        series
            .iter()
            .find(|(_, value)| direction.is_better_or_equal(**value, target))
            .map(|(at, _)| Self::Reached(*at))
            .unwrap_or(Self::Unreached)
    }

    pub fn is_reached(&self) -> bool {
        matches!(self, Self::Reached(_))
    }

    /// Whether the target counts as reached when observed at `at`.
    pub fn reached_by(&self, at: Duration) -> bool {
        match self {
            Self::Reached(t) => *t <= at,
            Self::Unreached => false,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Reached(t) => Some(*t),
            Self::Unreached => None,
        }
    }
}
