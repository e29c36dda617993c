//! Shared summaries between query workers and their readers.
//!
//! Each worker owns one slot of the shared map and replaces its whole
//! record after every step; readers clone a snapshot, so a partially
//! updated summary is never observable.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use steerag_core::metrics::{Metric, Stability};
use steerag_core::vulns::median_f64;
use steerag_engine::SteeringGenerator;

/// Map from query id to its latest shared state.
pub type SharedMap = Arc<RwLock<HashMap<u32, QuerySharedState>>>;

pub fn new_shared_map() -> SharedMap {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Histograms of the six path metrics, as accumulated by a generator.
#[derive(Debug, Clone, Serialize)]
pub struct MetricHistograms {
    pub likelihood: Vec<u64>,
    pub impact: Vec<u64>,
    pub damage: Vec<u64>,
    pub score: Vec<u64>,
    pub risk: Vec<u64>,
    pub length: Vec<u64>,
}

/// Snapshot of one query's latest iteration, published to readers.
#[derive(Debug, Clone, Serialize)]
pub struct SharedSummary {
    pub id: u32,
    pub iteration: u64,
    /// Unique paths produced by the last iteration.
    pub generated: u64,
    /// Unique paths over the query's lifetime.
    pub unique: u64,
    /// Query-satisfying paths produced by the last iteration.
    pub query_generated: u64,
    /// Query-satisfying unique paths over the lifetime.
    pub query_unique: u64,
    pub collision_rate: f64,
    /// `None` until a second iteration provides a comparison.
    pub stability: Option<Stability>,
    pub precision: f64,
    pub histograms: MetricHistograms,
    pub hosts_count: HashMap<u32, u64>,
    pub edges_count: HashMap<u32, HashMap<u32, u64>>,
    pub hosts_sum: u64,
    pub edges_sum: u64,
}

impl SharedSummary {
    pub fn from_generator(id: u32, generator: &SteeringGenerator) -> Self {
        let stats = generator.statistics();
        Self {
            id,
            iteration: generator.iteration(),
            generated: generator.last_generated(),
            unique: generator.unique_count(),
            query_generated: generator.last_query_generated(),
            query_unique: generator.query_unique_count(),
            collision_rate: generator.last_collision(),
            stability: generator.last_stability(),
            precision: generator.last_precision(),
            histograms: MetricHistograms {
                likelihood: stats.likelihoods.clone(),
                impact: stats.impacts.clone(),
                damage: stats.damages.clone(),
                score: stats.scores.clone(),
                risk: stats.risks.clone(),
                length: stats.lengths.clone(),
            },
            hosts_count: stats.hosts_count.clone(),
            edges_count: stats.edges_count.clone(),
            hosts_sum: stats.hosts_sum,
            edges_sum: stats.edges_sum,
        }
    }
}

/// Per-query record in the shared map: the latest summary plus the
/// history the monitoring side plots.
#[derive(Debug, Clone, Serialize)]
pub struct QuerySharedState {
    pub id: u32,
    /// The metrics the query constrains; stability is condensed over
    /// these axes.
    pub metrics: HashSet<Metric>,
    pub summary: Option<SharedSummary>,
    /// One condensed stability value per iteration (`None` for the
    /// first).
    pub stability: Vec<Option<f64>>,
    pub min_stability: Option<f64>,
    pub max_stability: Option<f64>,
    pub precision: Vec<f64>,
}

impl QuerySharedState {
    pub fn new(id: u32, metrics: HashSet<Metric>) -> Self {
        Self {
            id,
            metrics,
            summary: None,
            stability: Vec::new(),
            min_stability: None,
            max_stability: None,
            precision: Vec::new(),
        }
    }

    /// Fold the generator's latest iteration into this record. The
    /// stability history keeps the median over the query's constrained
    /// metrics, falling back to the mean of all five axes for
    /// unconstrained queries.
    pub fn update(&mut self, generator: &SteeringGenerator) {
        self.summary = Some(SharedSummary::from_generator(self.id, generator));
        self.precision.push(generator.last_precision());

        let condensed = generator.last_stability().map(|stability| {
            let relevant: Vec<f64> = self
                .metrics
                .iter()
                .filter_map(|metric| stability.get(*metric))
                .collect();
            if relevant.is_empty() {
                stability.mean()
            } else {
                median_f64(relevant)
            }
        });

        if let Some(value) = condensed {
            self.min_stability = Some(self.min_stability.map_or(value, |m| m.min(value)));
            self.max_stability = Some(self.max_stability.map_or(value, |m| m.max(value)));
        }
        self.stability.push(condensed);
    }

    /// Replace this query's slot in the shared map with a snapshot.
    pub fn publish(&self, shared: &SharedMap) {
        shared.write().insert(self.id, self.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condensed_stability_uses_constrained_metrics() {
        let stability = Stability {
            likelihood: 0.9,
            impact: 0.5,
            score: 0.1,
            risk: 0.3,
            length: 0.7,
        };

        // Median over the two constrained axes.
        let metrics: HashSet<Metric> = [Metric::Likelihood, Metric::Impact].into();
        let relevant: Vec<f64> = metrics
            .iter()
            .filter_map(|m| stability.get(*m))
            .collect();
        assert_eq!(median_f64(relevant), 0.7);

        // Unconstrained queries fall back to the mean of all five.
        assert!((stability.mean() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn publish_replaces_whole_record() {
        let shared = new_shared_map();
        let mut state = QuerySharedState::new(3, HashSet::new());
        state.precision.push(0.25);
        state.publish(&shared);

        state.precision.push(0.75);
        state.publish(&shared);

        let snapshot = shared.read().get(&3).cloned().unwrap();
        assert_eq!(snapshot.precision, vec![0.25, 0.75]);
    }
}
