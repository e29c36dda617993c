//! Attack-path metric names, histogram binning, and range conditions.
//!
//! Every score-like metric lives on a `[0, 10]` scale split into 100
//! buckets; path length gets 40 buckets covering lengths 1..40 with
//! everything longer collapsing into the last one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of histogram buckets for score-like metrics.
pub const METRIC_BINS: usize = 100;
/// Number of histogram buckets for path length.
pub const LENGTH_BINS: usize = 40;
/// Hard ceiling on sampled path length.
pub const ABSOLUTE_MAX_LENGTH: usize = 40;

/// A metric computed for every attack path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Likelihood,
    Impact,
    Score,
    Risk,
    Damage,
    Length,
}

impl Metric {
    /// The five metrics a query may constrain and the joint histograms
    /// cover (damage is tracked but not queryable).
    pub const QUERYABLE: [Metric; 5] = [
        Metric::Likelihood,
        Metric::Impact,
        Metric::Risk,
        Metric::Score,
        Metric::Length,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Likelihood => "likelihood",
            Metric::Impact => "impact",
            Metric::Score => "score",
            Metric::Risk => "risk",
            Metric::Damage => "damage",
            Metric::Length => "length",
        }
    }

    /// Histogram width for this metric.
    pub fn bins(&self) -> usize {
        match self {
            Metric::Length => LENGTH_BINS,
            _ => METRIC_BINS,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "likelihood" => Ok(Metric::Likelihood),
            "impact" => Ok(Metric::Impact),
            "score" => Ok(Metric::Score),
            "risk" => Ok(Metric::Risk),
            "damage" => Ok(Metric::Damage),
            "length" => Ok(Metric::Length),
            other => Err(format!("unknown metric `{other}`")),
        }
    }
}

/// Bucket index of a score-like value: `floor(v / 10 · 100)`, with 10.0
/// landing in the last bucket.
pub fn metric_bucket(value: f64) -> usize {
    if value >= 10.0 {
        METRIC_BINS - 1
    } else {
        ((value / 10.0 * METRIC_BINS as f64) as usize).min(METRIC_BINS - 1)
    }
}

/// Bucket index of a path length: lengths 1..40 map to 0..39, longer
/// paths collapse into the last bucket.
pub fn length_bucket(length: usize) -> usize {
    length.saturating_sub(1).min(LENGTH_BINS - 1)
}

/// Per-metric distribution stability for one iteration: `1 − KS distance`
/// between the running CDF and the previous iteration's CDF.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stability {
    pub likelihood: f64,
    pub impact: f64,
    pub score: f64,
    pub risk: f64,
    pub length: f64,
}

impl Stability {
    /// Value for a single metric axis (damage carries no stability).
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Likelihood => Some(self.likelihood),
            Metric::Impact => Some(self.impact),
            Metric::Score => Some(self.score),
            Metric::Risk => Some(self.risk),
            Metric::Length => Some(self.length),
            Metric::Damage => None,
        }
    }

    /// Mean over the five tracked axes.
    pub fn mean(&self) -> f64 {
        (self.likelihood + self.impact + self.score + self.risk + self.length) / 5.0
    }
}

/// An inclusive `[min, max]` range on a float metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    pub min: f64,
    pub max: f64,
}

impl MetricRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// An inclusive range condition on a single metric, as used by store
/// filters and joint histograms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricCondition {
    pub metric: Metric,
    pub min: f64,
    pub max: f64,
}

impl MetricCondition {
    pub fn new(metric: Metric, min: f64, max: f64) -> Self {
        Self { metric, min, max }
    }
}
