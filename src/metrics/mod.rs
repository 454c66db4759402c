//! Time-series generation, aggregation and smoothing.
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::random::RandomSource;

mod range;
mod report;

pub use range::{DEFAULT_POINT_COUNT, TimeRange};
pub use report::{
    ClusterMetrics, ConsumerGroupMetrics, DISK_TREND_POINTS, LagTrend, LeaderShare, MemberMetrics,
    MetricsSnapshot, PartitionMetrics, RebalanceEvent, RebalanceKind, SizeBucket, TopicMetrics,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Points with strictly increasing timestamps.
pub type MetricSeries = Vec<DataPoint>;

/// `count` points ending at `now`, `cadence` apart, scattered around `base`.
///
/// Each value is `base` plus a uniform offset in `[-variance / 2, variance / 2)`, floored at zero. A
/// non-finite `variance` counts as zero. Points whose timestamp would fall outside the representable range
/// are left out, so the series may come back shorter than `count`.
pub fn generate_series<R: Rng>(
    random: &mut RandomSource<R>,
    base: f64,
    variance: f64,
    count: usize,
    cadence: TimeDelta,
    now: DateTime<Utc>,
) -> MetricSeries {
    let cadence = cadence.max(TimeDelta::milliseconds(1));
    let half = if variance.is_finite() {
        variance.abs() / 2.0
    } else {
        0.0
    };

    (0..count)
        .map_while(|steps_back| steps_before(now, cadence, steps_back))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|timestamp| {
            let value = base + random.uniform(-half, half);
            DataPoint::new(timestamp, value.max(0.0))
        })
        .collect()
}

/// `now - cadence * steps`, or `None` once that leaves the representable range.
pub(crate) fn steps_before(
    now: DateTime<Utc>,
    cadence: TimeDelta,
    steps: usize,
) -> Option<DateTime<Utc>> {
    let steps = i32::try_from(steps).ok()?;
    now.checked_sub_signed(cadence.checked_mul(steps)?)
}

/// Averages `series` into fixed windows of `interval`.
///
/// Windows are left-aligned multiples of `interval` starting with the one holding the first point. Each
/// non-empty window yields its mean stamped at the window midpoint.
pub fn aggregate(series: &[DataPoint], interval: TimeDelta) -> MetricSeries {
    let interval_ms = interval.num_milliseconds();
    if series.is_empty() || interval_ms <= 0 {
        return series.to_vec();
    }

    let window_of = |p: &DataPoint| p.timestamp.timestamp_millis().div_euclid(interval_ms);
    let flush = |window: i64, sum: f64, n: usize, out: &mut MetricSeries| {
        let midpoint = window * interval_ms + interval_ms / 2;
        if let Some(ts) = DateTime::from_timestamp_millis(midpoint) {
            out.push(DataPoint::new(ts, sum / n as f64));
        }
    };

    let mut out = vec![];
    let mut current = window_of(&series[0]);
    let (mut sum, mut n) = (0.0, 0usize);

    for point in series {
        let window = window_of(point);
        if window != current {
            flush(current, sum, n, &mut out);
            current = window;
            (sum, n) = (0.0, 0);
        }
        sum += point.value;
        n += 1;
    }
    flush(current, sum, n, &mut out);

    out
}

/// Centered moving average over `window` points, clipped at both ends.
pub fn smooth(series: &[DataPoint], window: usize) -> MetricSeries {
    if series.is_empty() || window <= 1 {
        return series.to_vec();
    }

    let before = window / 2;
    let after = window.div_ceil(2);

    (0..series.len())
        .map(|i| {
            let start = i.saturating_sub(before);
            let end = (i + after).min(series.len());
            let slice = &series[start..end];
            DataPoint::new(series[i].timestamp, sum(slice) / slice.len() as f64)
        })
        .collect()
}

pub fn sum(series: &[DataPoint]) -> f64 {
    series.iter().map(|p| p.value).sum()
}

pub fn average(series: &[DataPoint]) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    sum(series) / series.len() as f64
}

pub fn max(series: &[DataPoint]) -> f64 {
    series
        .iter()
        .map(|p| p.value)
        .reduce(f64::max)
        .unwrap_or_default()
}

pub fn min(series: &[DataPoint]) -> f64 {
    series
        .iter()
        .map(|p| p.value)
        .reduce(f64::min)
        .unwrap_or_default()
}

/// Value of the newest point, `0` for an empty series.
pub fn last(series: &[DataPoint]) -> f64 {
    series.last().map(|p| p.value).unwrap_or_default()
}
