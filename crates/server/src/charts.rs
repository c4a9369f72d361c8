//! Reduction of raw metric history into the series drawn by the dashboard's
//! time-range selector. Everything here is pure and recomputed per request.

use chrono::{DateTime, Duration, Utc};
use fleetwatch_common::ParseEnumError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::db::models::MetricSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeWindow {
    #[serde(rename = "10min")]
    TenMinutes,
    #[default]
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "6hour")]
    SixHours,
    #[serde(rename = "24hour")]
    TwentyFourHours,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::TenMinutes => "10min",
            TimeWindow::OneHour => "1hour",
            TimeWindow::SixHours => "6hour",
            TimeWindow::TwentyFourHours => "24hour",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::TenMinutes => Duration::minutes(10),
            TimeWindow::OneHour => Duration::hours(1),
            TimeWindow::SixHours => Duration::hours(6),
            TimeWindow::TwentyFourHours => Duration::hours(24),
        }
    }
}

impl FromStr for TimeWindow {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "10min" => Ok(TimeWindow::TenMinutes),
            "1hour" => Ok(TimeWindow::OneHour),
            "6hour" => Ok(TimeWindow::SixHours),
            "24hour" => Ok(TimeWindow::TwentyFourHours),
            _ => Err(ParseEnumError {
                kind: "time window",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartMetric {
    #[default]
    Cpu,
    Memory,
    Disk,
}

impl ChartMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartMetric::Cpu => "cpu",
            ChartMetric::Memory => "memory",
            ChartMetric::Disk => "disk",
        }
    }

    pub fn value_of(&self, sample: &MetricSample) -> f64 {
        match self {
            ChartMetric::Cpu => sample.cpu_usage,
            ChartMetric::Memory => sample.memory.percent,
            ChartMetric::Disk => sample.disk.percent,
        }
    }
}

impl FromStr for ChartMetric {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(ChartMetric::Cpu),
            "memory" => Ok(ChartMetric::Memory),
            "disk" => Ok(ChartMetric::Disk),
            _ => Err(ParseEnumError {
                kind: "chart metric",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ChartMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub window: TimeWindow,
    pub metric: ChartMetric,
    /// Ascending by timestamp.
    pub points: Vec<ChartPoint>,
    pub current: f64,
    pub trend: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub y_min: f64,
    pub y_max: f64,
    /// Indices into `points` to label on the x axis. May repeat for short series.
    pub x_ticks: Vec<usize>,
}

/// Keeps samples no older than the window at `now`, sorted ascending.
pub fn filter_window<'a>(
    history: &'a [MetricSample],
    window: TimeWindow,
    now: DateTime<Utc>,
) -> Vec<&'a MetricSample> {
    let span = window.duration();
    let mut kept: Vec<&MetricSample> = history
        .iter()
        .filter(|sample| now - sample.timestamp <= span)
        .collect();
    kept.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    kept
}

pub fn build_series(
    history: &[MetricSample],
    window: TimeWindow,
    metric: ChartMetric,
    now: DateTime<Utc>,
) -> ChartSeries {
    let points: Vec<ChartPoint> = filter_window(history, window, now)
        .into_iter()
        .map(|sample| ChartPoint {
            timestamp: sample.timestamp,
            value: metric.value_of(sample),
        })
        .collect();

    let n = points.len();
    let current = points.last().map_or(0.0, |p| p.value);
    let trend = if n >= 2 {
        current - points[n - 2].value
    } else {
        0.0
    };

    let (min, max, avg) = if n == 0 {
        (0.0, 0.0, 0.0)
    } else {
        let min = points.iter().map(|p| p.value).fold(f64::INFINITY, f64::min);
        let max = points.iter().map(|p| p.value).fold(f64::NEG_INFINITY, f64::max);
        let avg = points.iter().map(|p| p.value).sum::<f64>() / n as f64;
        (min, max, avg)
    };

    let x_ticks = if n == 0 {
        Vec::new()
    } else {
        vec![0, n / 3, 2 * n / 3, n - 1]
    };

    ChartSeries {
        window,
        metric,
        points,
        current,
        trend,
        min,
        max,
        avg,
        y_min: min.min(0.0),
        y_max: max.max(100.0),
        x_ticks,
    }
}
