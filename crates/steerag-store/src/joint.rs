//! Joint histograms over a generated-path store.
//!
//! When the user has selected a range on some metric, the histogram shown
//! for that metric must *not* apply the metric's own filter, otherwise the
//! user could no longer see what expanding their selection would bring in.
//! Every other filter still applies. Unfiltered metrics see all filters.

use std::collections::HashMap;

use steerag_core::metrics::{length_bucket, metric_bucket, Metric, MetricCondition};

use crate::error::Result;
use crate::store::PathStore;

/// Compute one histogram per queryable metric, each excluding its own
/// filter, over the given store.
pub fn joint_histograms(
    store: &PathStore,
    conditions: &[MetricCondition],
    sources: Option<&[u32]>,
    targets: Option<&[u32]>,
) -> Result<HashMap<Metric, Vec<u64>>> {
    let filtered: Vec<Metric> = conditions.iter().map(|c| c.metric).collect();
    let unfiltered: Vec<Metric> = Metric::QUERYABLE
        .iter()
        .copied()
        .filter(|m| !filtered.contains(m))
        .collect();

    let mut histograms = HashMap::new();

    // Unfiltered metrics share one pass with every condition applied.
    let values = store.metric_values(&unfiltered, conditions, None, sources, targets)?;
    for (metric, column) in values {
        histograms.insert(metric, build_histogram(metric, &column));
    }

    // Each filtered metric gets its own pass with its filter excluded.
    for metric in filtered {
        let values =
            store.metric_values(&[metric], conditions, Some(metric), sources, targets)?;
        let column = values.get(&metric).map(Vec::as_slice).unwrap_or(&[]);
        histograms.insert(metric, build_histogram(metric, column));
    }

    Ok(histograms)
}

fn build_histogram(metric: Metric, values: &[f64]) -> Vec<u64> {
    let mut histogram = vec![0u64; metric.bins()];
    for &value in values {
        let bucket = match metric {
            Metric::Length => length_bucket(value as usize),
            _ => metric_bucket(value),
        };
        histogram[bucket] += 1;
    }
    histogram
}
