//! Per-iteration statistics over generated attack paths.
//!
//! `Statistics` keeps binned histograms for the six path metrics plus
//! host/edge traversal tallies. `StabilityTracker` keeps running CDFs for
//! five metrics and reports, each iteration, how close the new CDF is to
//! the previous one (`1 − KS distance`).

use std::collections::HashMap;

use steerag_core::metrics::{
    length_bucket, metric_bucket, Stability, LENGTH_BINS, METRIC_BINS,
};

use crate::paths::AttackPath;

/// Binned histograms and traversal tallies over every path seen so far.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub num_paths: u64,

    pub likelihoods: Vec<u64>,
    pub impacts: Vec<u64>,
    pub damages: Vec<u64>,
    pub scores: Vec<u64>,
    pub risks: Vec<u64>,
    pub lengths: Vec<u64>,

    /// Times each host appears in a path.
    pub hosts_count: HashMap<u32, u64>,
    /// Times each directed edge is traversed, keyed source → target.
    pub edges_count: HashMap<u32, HashMap<u32, u64>>,
    pub hosts_sum: u64,
    pub edges_sum: u64,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            num_paths: 0,
            likelihoods: vec![0; METRIC_BINS],
            impacts: vec![0; METRIC_BINS],
            damages: vec![0; METRIC_BINS],
            scores: vec![0; METRIC_BINS],
            risks: vec![0; METRIC_BINS],
            lengths: vec![0; LENGTH_BINS],
            hosts_count: HashMap::new(),
            edges_count: HashMap::new(),
            hosts_sum: 0,
            edges_sum: 0,
        }
    }

    /// Fold one iteration's paths into the histograms and tallies.
    pub fn update(&mut self, new_paths: &[AttackPath]) {
        self.num_paths += new_paths.len() as u64;

        for path in new_paths {
            self.update_hosts_and_edges(path);

            self.likelihoods[metric_bucket(path.likelihood)] += 1;
            self.impacts[metric_bucket(path.impact)] += 1;
            self.scores[metric_bucket(path.score)] += 1;
            self.risks[metric_bucket(path.risk)] += 1;
            self.damages[metric_bucket(path.damage)] += 1;
            self.lengths[length_bucket(path.length)] += 1;
        }
    }

    fn update_hosts_and_edges(&mut self, path: &AttackPath) {
        for &(source, target) in &path.edges {
            *self
                .edges_count
                .entry(source)
                .or_default()
                .entry(target)
                .or_insert(0) += 1;
            self.edges_sum += 1;
        }

        for host in path.hosts() {
            *self.hosts_count.entry(host).or_insert(0) += 1;
            self.hosts_sum += 1;
        }
    }
}

/// Running CDFs and KS-style similarity against the previous iteration.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    count_likelihood: Vec<u64>,
    count_impact: Vec<u64>,
    count_score: Vec<u64>,
    count_risk: Vec<u64>,
    count_length: Vec<u64>,

    prev_likelihood: Vec<f64>,
    prev_impact: Vec<f64>,
    prev_score: Vec<f64>,
    prev_risk: Vec<f64>,
    prev_length: Vec<f64>,

    updates: u64,
}

impl Default for StabilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityTracker {
    pub fn new() -> Self {
        Self {
            count_likelihood: vec![0; METRIC_BINS],
            count_impact: vec![0; METRIC_BINS],
            count_score: vec![0; METRIC_BINS],
            count_risk: vec![0; METRIC_BINS],
            count_length: vec![0; LENGTH_BINS],
            prev_likelihood: vec![0.0; METRIC_BINS],
            prev_impact: vec![0.0; METRIC_BINS],
            prev_score: vec![0.0; METRIC_BINS],
            prev_risk: vec![0.0; METRIC_BINS],
            prev_length: vec![0.0; LENGTH_BINS],
            updates: 0,
        }
    }

    /// Fold one iteration's paths into the running distributions and
    /// compare against the previous CDFs. The first update has nothing to
    /// compare to and returns `None`.
    pub fn update(&mut self, new_paths: &[AttackPath]) -> Option<Stability> {
        for path in new_paths {
            self.count_likelihood[metric_bucket(path.likelihood)] += 1;
            self.count_impact[metric_bucket(path.impact)] += 1;
            self.count_score[metric_bucket(path.score)] += 1;
            self.count_risk[metric_bucket(path.risk)] += 1;
            self.count_length[length_bucket(path.length)] += 1;
        }

        let cdf_likelihood = counts_to_cdf(&self.count_likelihood);
        let cdf_impact = counts_to_cdf(&self.count_impact);
        let cdf_score = counts_to_cdf(&self.count_score);
        let cdf_risk = counts_to_cdf(&self.count_risk);
        let cdf_length = counts_to_cdf(&self.count_length);

        let stability = if self.updates > 0 {
            Some(Stability {
                likelihood: 1.0 - sup_difference(&self.prev_likelihood, &cdf_likelihood),
                impact: 1.0 - sup_difference(&self.prev_impact, &cdf_impact),
                score: 1.0 - sup_difference(&self.prev_score, &cdf_score),
                risk: 1.0 - sup_difference(&self.prev_risk, &cdf_risk),
                length: 1.0 - sup_difference(&self.prev_length, &cdf_length),
            })
        } else {
            None
        };

        self.prev_likelihood = cdf_likelihood;
        self.prev_impact = cdf_impact;
        self.prev_score = cdf_score;
        self.prev_risk = cdf_risk;
        self.prev_length = cdf_length;
        self.updates += 1;

        stability
    }
}

/// Cumulative sum normalized to end at 1.0; all-zero input stays all-zero.
fn counts_to_cdf(counts: &[u64]) -> Vec<f64> {
    let mut cdf = Vec::with_capacity(counts.len());
    let mut sum = 0u64;
    for &count in counts {
        sum += count;
        cdf.push(sum as f64);
    }
    if sum > 0 {
        let total = sum as f64;
        for value in &mut cdf {
            *value /= total;
        }
    }
    cdf
}

/// Kolmogorov–Smirnov supremum distance between two CDFs.
fn sup_difference(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}
