//! Query-steered path generation ("SteerAG").
//!
//! A steered generator runs the same iteration loop as the unconstrained
//! one, but filters every fresh path against the query's metric bounds,
//! keeps rolling buffers of passing and failing paths, and periodically
//! trains a classifier on them. The vulnerabilities the classifier flags
//! as query-compliant are handed to the sampler as a preference, pulling
//! subsequent iterations toward the query.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use steerag_core::metrics::{Metric, MetricRange};
use steerag_core::vulns::FEATURE_COUNT;
use steerag_core::AttackGraphModel;

use crate::classifier::{Classifier, DecisionTreeClassifier};
use crate::error::Result;
use crate::generator::{GeneratorOptions, PathGenerator};
use crate::paths::AttackPath;
use crate::sampling::{Edge, PathSampler, SamplerOptions, Strategy};

/// Window of past precisions consulted by the retraining trigger.
const PRECISION_WINDOW: usize = 5;

/// Analyst query: inclusive bounds on path metrics plus optional
/// source/target host constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttackPathQuery {
    pub likelihood: Option<MetricRange>,
    pub impact: Option<MetricRange>,
    pub score: Option<MetricRange>,
    pub risk: Option<MetricRange>,
    /// Inclusive length bounds.
    pub length: Option<(usize, usize)>,

    pub sources: Option<Vec<u32>>,
    pub targets: Option<Vec<u32>>,
}

impl AttackPathQuery {
    /// The metrics this query constrains; drives which stability axes the
    /// monitoring side cares about.
    pub fn metrics(&self) -> HashSet<Metric> {
        let mut metrics = HashSet::new();
        if self.likelihood.is_some() {
            metrics.insert(Metric::Likelihood);
        }
        if self.impact.is_some() {
            metrics.insert(Metric::Impact);
        }
        if self.score.is_some() {
            metrics.insert(Metric::Score);
        }
        if self.risk.is_some() {
            metrics.insert(Metric::Risk);
        }
        if self.length.is_some() {
            metrics.insert(Metric::Length);
        }
        metrics
    }

    /// Whether a path satisfies every constrained metric bound. The
    /// topological constraints are not re-checked: the sampler below is
    /// chosen so its paths already satisfy them.
    pub fn check_bounds(&self, path: &AttackPath) -> bool {
        if let Some(range) = &self.likelihood {
            if !range.contains(path.likelihood) {
                return false;
            }
        }
        if let Some(range) = &self.impact {
            if !range.contains(path.impact) {
                return false;
            }
        }
        if let Some(range) = &self.score {
            if !range.contains(path.score) {
                return false;
            }
        }
        if let Some(range) = &self.risk {
            if !range.contains(path.risk) {
                return false;
            }
        }
        if let Some((min, max)) = self.length {
            if path.length < min || path.length > max {
                return false;
            }
        }
        true
    }

    /// Build the sampler whose strategy satisfies the query's topological
    /// constraints.
    pub fn sampler(&self, model: Arc<AttackGraphModel>) -> Result<PathSampler> {
        let strategy = match (&self.sources, &self.targets) {
            (None, None) => Strategy::Uniform,
            (Some(sources), None) => Strategy::StartingAt(sources.clone()),
            (None, Some(targets)) => Strategy::EndingAt(targets.clone()),
            (Some(sources), Some(targets)) => {
                Strategy::source_target(sources.clone(), targets.clone())
            }
        };

        let (min_length, max_length) = match self.length {
            Some((min, max)) => (Some(min), Some(max)),
            None => (None, None),
        };

        PathSampler::new(
            model,
            SamplerOptions {
                min_length,
                max_length,
                strategy,
                ..Default::default()
            },
        )
    }
}

/// Construction parameters for [`SteeringGenerator`].
#[derive(Debug, Clone)]
pub struct SteeringOptions {
    /// Reachability walks attempted per iteration.
    pub sample_size: usize,
    /// Buffer fill level required before steering may start.
    pub min_training_size: usize,
    /// Rolling cap on each training buffer.
    pub max_training_size: usize,
    pub store_path: Option<PathBuf>,
    pub csv_path: Option<PathBuf>,
    pub seed: Option<u64>,
    /// Disable steering entirely (paths are still filtered and counted).
    pub disable_steering: bool,
}

impl Default for SteeringOptions {
    fn default() -> Self {
        Self {
            sample_size: 500,
            min_training_size: 20,
            max_training_size: 200,
            store_path: None,
            csv_path: None,
            seed: None,
            disable_steering: false,
        }
    }
}

/// Steered generator for one analyst query.
pub struct SteeringGenerator {
    base: PathGenerator,
    query: AttackPathQuery,
    disable_steering: bool,

    min_dataset_size: usize,
    max_dataset_size: usize,

    /// Rolling buffer of recent query-satisfying paths.
    query_buffer: Vec<AttackPath>,
    /// Rolling buffer of recent non-satisfying paths.
    nonquery_buffer: Vec<AttackPath>,

    query_hashes: HashSet<String>,
    query_generated: Vec<u64>,
    precision: Vec<f64>,
    steering_history: Vec<bool>,
    steering_compliant_vulns: HashSet<String>,

    classifier: Box<dyn Classifier>,
}

impl SteeringGenerator {
    pub fn new(
        model: Arc<AttackGraphModel>,
        query: AttackPathQuery,
        options: SteeringOptions,
    ) -> Result<Self> {
        let sampler = query.sampler(Arc::clone(&model))?;
        let base = PathGenerator::with_sampler(
            model,
            sampler,
            GeneratorOptions {
                sample_size: options.sample_size,
                max_length: None,
                store_path: options.store_path,
                csv_path: options.csv_path,
                seed: options.seed,
            },
            true,
        )?;

        Ok(Self {
            base,
            query,
            disable_steering: options.disable_steering,
            min_dataset_size: options.min_training_size,
            max_dataset_size: options.max_training_size,
            query_buffer: Vec::new(),
            nonquery_buffer: Vec::new(),
            query_hashes: HashSet::new(),
            query_generated: Vec::new(),
            precision: Vec::new(),
            steering_history: Vec::new(),
            steering_compliant_vulns: HashSet::new(),
            classifier: Box::new(DecisionTreeClassifier::new()),
        })
    }

    /// Swap in a different classifier implementation.
    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Run one iteration, returning the query-satisfying and the
    /// remaining fresh paths.
    pub fn step(&mut self) -> Result<(Vec<AttackPath>, Vec<AttackPath>)> {
        let start = Instant::now();

        let steering = self.can_steer();
        let attack_paths = if steering {
            // Retrain only while precision keeps up with its recent
            // average; a stale compliant set keeps steering regardless.
            if self.retrain_trigger() || self.steering_compliant_vulns.is_empty() {
                self.update_steering_compliant_vulns()?;
            }
            self.base
                .sample_attack_paths(Some(&self.steering_compliant_vulns))
        } else {
            self.base.sample_attack_paths(None)
        };

        let result = self.advance_iteration(attack_paths)?;
        self.base.times.push(start.elapsed().as_secs_f64());
        self.steering_history.push(steering);

        self.base.iteration += 1;
        let precision = self.precision.last().copied();
        self.base.log_iteration(precision)?;
        Ok(result)
    }

    /// Inject externally supplied traces as iteration 0, as if they had
    /// been sampled: they seed the buffers, the statistics, and the edge
    /// weights.
    pub fn bootstrap(&mut self, traces: &[String]) -> Result<(Vec<AttackPath>, Vec<AttackPath>)> {
        let start = Instant::now();

        let mut paths = Vec::with_capacity(traces.len());
        for trace in traces {
            paths.push(AttackPath::from_trace(trace, &self.base.model)?);
        }

        self.base.generated.push(paths.len() as u64);
        self.base.collision.push(0.0);
        for path in &paths {
            self.base.unique_hashes.insert(path.hash.clone());
        }

        let edge_lists: Vec<Vec<Edge>> = paths.iter().map(|p| p.edges.clone()).collect();
        let result = self.advance_iteration(paths)?;

        if self.base.sampler.use_dynamic_weights() {
            for edges in &edge_lists {
                self.base.sampler.record_external_path(edges);
            }
        }

        self.base.times.push(start.elapsed().as_secs_f64());
        self.steering_history.push(false);
        self.base.iteration += 1;
        let precision = self.precision.last().copied();
        self.base.log_iteration(precision)?;
        Ok(result)
    }

    /// Shared tail of a step: split by bounds, persist and aggregate the
    /// query-satisfying paths, extend the training buffers.
    fn advance_iteration(
        &mut self,
        attack_paths: Vec<AttackPath>,
    ) -> Result<(Vec<AttackPath>, Vec<AttackPath>)> {
        let (query_paths, nonquery_paths) = self.split_paths(attack_paths);

        self.base.persist(&query_paths)?;

        if let Some(stability) = self.base.stability_tracker.update(&query_paths) {
            self.base.stability.push(stability);
        }
        self.base.statistics.update(&query_paths);

        for path in &query_paths {
            self.query_hashes.insert(path.hash.clone());
        }
        self.query_generated.push(query_paths.len() as u64);

        Ok((query_paths, nonquery_paths))
    }

    /// Partition fresh paths by the query bounds, update precision, and
    /// roll the training buffers.
    fn split_paths(
        &mut self,
        attack_paths: Vec<AttackPath>,
    ) -> (Vec<AttackPath>, Vec<AttackPath>) {
        let mut query_paths = Vec::new();
        let mut nonquery_paths = Vec::new();
        for path in attack_paths {
            if self.query.check_bounds(&path) {
                query_paths.push(path);
            } else {
                nonquery_paths.push(path);
            }
        }

        let total = query_paths.len() + nonquery_paths.len();
        self.precision.push(if total == 0 {
            0.0
        } else {
            query_paths.len() as f64 / total as f64
        });

        self.query_buffer.extend(query_paths.iter().cloned());
        self.nonquery_buffer.extend(nonquery_paths.iter().cloned());
        trim_to_recent(&mut self.query_buffer, self.max_dataset_size);
        trim_to_recent(&mut self.nonquery_buffer, self.max_dataset_size);

        (query_paths, nonquery_paths)
    }

    /// Steering needs enough of both classes in the buffers and must not
    /// be disabled for this query.
    fn can_steer(&self) -> bool {
        !self.disable_steering
            && self.query_buffer.len() >= self.min_dataset_size
            && self.nonquery_buffer.len() >= self.min_dataset_size
    }

    /// Retrain while the recent precision average does not exceed the
    /// latest precision. The average always divides by the window size,
    /// so a short history biases toward retraining.
    fn retrain_trigger(&self) -> bool {
        let window_start = self.precision.len().saturating_sub(PRECISION_WINDOW);
        let average =
            self.precision[window_start..].iter().sum::<f64>() / PRECISION_WINDOW as f64;
        self.precision
            .last()
            .map_or(true, |&latest| average <= latest)
    }

    /// Train the classifier on the buffered paths and re-predict the
    /// whole pool, replacing the steering-compliant set.
    pub fn update_steering_compliant_vulns(&mut self) -> Result<()> {
        let rows = self.query_buffer.len() + self.nonquery_buffer.len();
        let mut features = Array2::zeros((rows, FEATURE_COUNT));
        let mut labels = Vec::with_capacity(rows);

        for (row, path) in self
            .query_buffer
            .iter()
            .chain(self.nonquery_buffer.iter())
            .enumerate()
        {
            let vector = path.feature_vector().as_array();
            for (column, value) in vector.into_iter().enumerate() {
                features[[row, column]] = value;
            }
            labels.push(row < self.query_buffer.len());
        }

        self.classifier.fit(&features, &labels)?;

        let pool = self.base.model.pool();
        let mut pool_features = Array2::zeros((pool.len(), FEATURE_COUNT));
        let mut cve_ids = Vec::with_capacity(pool.len());
        for (row, vuln) in pool.values().enumerate() {
            let vector = vuln.base_features.as_array();
            for (column, value) in vector.into_iter().enumerate() {
                pool_features[[row, column]] = value;
            }
            cve_ids.push(vuln.cve_id.clone());
        }

        let predictions = self.classifier.predict(&pool_features)?;
        self.steering_compliant_vulns = cve_ids
            .into_iter()
            .zip(predictions)
            .filter(|(_, compliant)| *compliant)
            .map(|(cve_id, _)| cve_id)
            .collect();

        tracing::debug!(
            compliant = self.steering_compliant_vulns.len(),
            pool = pool.len(),
            "Retrained steering classifier"
        );
        Ok(())
    }

    pub fn query(&self) -> &AttackPathQuery {
        &self.query
    }

    pub fn iteration(&self) -> u64 {
        self.base.iteration()
    }

    pub fn unique_count(&self) -> u64 {
        self.base.unique_count()
    }

    pub fn query_unique_count(&self) -> u64 {
        self.query_hashes.len() as u64
    }

    pub fn last_generated(&self) -> u64 {
        self.base.last_generated()
    }

    pub fn last_query_generated(&self) -> u64 {
        self.query_generated.last().copied().unwrap_or(0)
    }

    pub fn last_collision(&self) -> f64 {
        self.base.last_collision()
    }

    pub fn last_stability(&self) -> Option<steerag_core::metrics::Stability> {
        self.base.last_stability()
    }

    pub fn last_precision(&self) -> f64 {
        self.precision.last().copied().unwrap_or(0.0)
    }

    pub fn precision_history(&self) -> &[f64] {
        &self.precision
    }

    pub fn steering_history(&self) -> &[bool] {
        &self.steering_history
    }

    pub fn steering_compliant_vulns(&self) -> &HashSet<String> {
        &self.steering_compliant_vulns
    }

    pub fn statistics(&self) -> &crate::stats::Statistics {
        self.base.statistics()
    }

    pub fn store(&self) -> Option<&steerag_store::PathStore> {
        self.base.store()
    }

    pub fn model(&self) -> &Arc<AttackGraphModel> {
        self.base.model()
    }
}

/// Keep only the most recent `max` entries.
fn trim_to_recent(buffer: &mut Vec<AttackPath>, max: usize) {
    if buffer.len() > max {
        buffer.drain(..buffer.len() - max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{host, model_from, vuln_record};

    /// Complete digraph over 16 hosts, each carrying the same mixed pool:
    /// 30% of the CVEs have exploitability ≥ 7, the rest sit low. Big
    /// enough that a few thousand samples do not exhaust the trace space.
    fn mixed_model() -> Arc<AttackGraphModel> {
        let mut records = Vec::new();
        let mut cves = Vec::new();
        for i in 0..10 {
            let id = format!("CVE-MIX-{i:04}");
            let exploitability = if i < 3 { 8.0 + 0.5 * i as f64 } else { 2.0 };
            records.push(vuln_record(&id, 5.0, 5.0, exploitability, "NONE", false));
            cves.push(id);
        }
        let cve_refs: Vec<&str> = cves.iter().map(String::as_str).collect();

        let hosts = (0..16).map(|id| host(id, &cve_refs)).collect();
        let mut edges = Vec::new();
        for a in 0..16u32 {
            for b in 0..16u32 {
                if a != b {
                    edges.push((a, b));
                }
            }
        }
        Arc::new(model_from(records, hosts, &edges))
    }

    /// Likelihood ∈ [7, 10] over single-hop paths, so a path passes
    /// exactly when its one CVE is from the high 30%.
    fn high_likelihood_query() -> AttackPathQuery {
        AttackPathQuery {
            likelihood: Some(MetricRange::new(7.0, 10.0)),
            length: Some((1, 1)),
            ..Default::default()
        }
    }

    #[test]
    fn query_metrics_reflect_constraints() {
        let query = AttackPathQuery {
            likelihood: Some(MetricRange::new(7.0, 10.0)),
            length: Some((2, 5)),
            ..Default::default()
        };
        let metrics = query.metrics();
        assert!(metrics.contains(&Metric::Likelihood));
        assert!(metrics.contains(&Metric::Length));
        assert_eq!(metrics.len(), 2);
    }

    #[test]
    fn strategy_selection_follows_sources_and_targets() {
        let model = mixed_model();

        let by = |sources: Option<Vec<u32>>, targets: Option<Vec<u32>>| {
            let query = AttackPathQuery {
                sources,
                targets,
                ..Default::default()
            };
            query.sampler(Arc::clone(&model)).unwrap()
        };

        assert!(matches!(by(None, None).strategy(), Strategy::Uniform));
        assert!(matches!(
            by(Some(vec![0]), None).strategy(),
            Strategy::StartingAt(_)
        ));
        assert!(matches!(
            by(None, Some(vec![2])).strategy(),
            Strategy::EndingAt(_)
        ));
        assert!(matches!(
            by(Some(vec![0]), Some(vec![2])).strategy(),
            Strategy::SourceTarget { .. }
        ));
    }

    #[test]
    fn bounds_check_covers_length() {
        let query = AttackPathQuery {
            length: Some((2, 3)),
            ..Default::default()
        };
        let model = mixed_model();
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let short =
            crate::paths::build_attack_path(&model, &[(0, 1)], None, &mut rng).unwrap();
        assert!(!query.check_bounds(&short));
        let ok =
            crate::paths::build_attack_path(&model, &[(0, 1), (1, 2)], None, &mut rng).unwrap();
        assert!(query.check_bounds(&ok));
    }

    #[test]
    fn precision_tracks_the_base_rate_then_improves() {
        let model = mixed_model();
        let mut generator = SteeringGenerator::new(
            model,
            high_likelihood_query(),
            SteeringOptions {
                sample_size: 300,
                seed: Some(99),
                ..Default::default()
            },
        )
        .unwrap();

        // Run until steering has been active for a while.
        let mut presteering_precision = None;
        for _ in 0..6 {
            generator.step().unwrap();
            if presteering_precision.is_none()
                && generator.steering_history().last() == Some(&true)
            {
                let history = generator.precision_history();
                // Mean precision before steering kicked in.
                let before = &history[..history.len() - 1];
                presteering_precision =
                    Some(before.iter().sum::<f64>() / before.len() as f64);
            }
        }

        // Unsteered single-hop precision converges on the fraction of
        // high-exploitability CVEs in the pool.
        let before = presteering_precision.expect("steering never activated");
        assert!(
            (0.2..=0.4).contains(&before),
            "unsteered precision {before} strayed from the 0.30 base rate"
        );

        assert!(!generator.steering_compliant_vulns().is_empty());
        let after = generator.last_precision();
        assert!(
            after > before,
            "steering did not improve precision ({before} → {after})"
        );
        assert!(after > 0.5, "steered precision stayed low: {after}");
    }

    #[test]
    fn compliant_set_is_deterministic_for_fixed_buffers() {
        let model = mixed_model();
        let mut generator = SteeringGenerator::new(
            Arc::clone(&model),
            high_likelihood_query(),
            SteeringOptions {
                sample_size: 200,
                seed: Some(5),
                ..Default::default()
            },
        )
        .unwrap();

        // Fill the buffers without steering.
        while generator.query_buffer.len() < 20 || generator.nonquery_buffer.len() < 20 {
            generator.step().unwrap();
        }

        generator.update_steering_compliant_vulns().unwrap();
        let first = generator.steering_compliant_vulns().clone();
        generator.update_steering_compliant_vulns().unwrap();
        let second = generator.steering_compliant_vulns().clone();

        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn buffers_trim_to_the_most_recent() {
        let model = mixed_model();
        let mut generator = SteeringGenerator::new(
            model,
            high_likelihood_query(),
            SteeringOptions {
                sample_size: 100,
                max_training_size: 30,
                seed: Some(17),
                ..Default::default()
            },
        )
        .unwrap();

        for _ in 0..10 {
            generator.step().unwrap();
        }
        assert!(generator.query_buffer.len() <= 30);
        assert!(generator.nonquery_buffer.len() <= 30);
    }

    #[test]
    fn disabled_steering_never_activates() {
        let model = mixed_model();
        let mut generator = SteeringGenerator::new(
            model,
            high_likelihood_query(),
            SteeringOptions {
                sample_size: 200,
                disable_steering: true,
                seed: Some(23),
                ..Default::default()
            },
        )
        .unwrap();

        for _ in 0..10 {
            generator.step().unwrap();
        }
        assert!(generator.steering_history().iter().all(|&s| !s));
        assert!(generator.steering_compliant_vulns().is_empty());
    }

    #[test]
    fn only_query_paths_feed_statistics_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("query_0_aps.db");

        let model = mixed_model();
        let mut generator = SteeringGenerator::new(
            model,
            high_likelihood_query(),
            SteeringOptions {
                sample_size: 150,
                store_path: Some(store_path),
                seed: Some(31),
                ..Default::default()
            },
        )
        .unwrap();

        let mut query_total = 0u64;
        for _ in 0..5 {
            let (query_paths, _) = generator.step().unwrap();
            query_total += query_paths.len() as u64;
        }

        assert_eq!(generator.statistics().num_paths, query_total);
        assert_eq!(generator.query_unique_count(), query_total);
        assert_eq!(generator.store().unwrap().count().unwrap(), query_total);
    }

    #[test]
    fn bootstrap_seeds_iteration_zero() {
        let model = mixed_model();
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let seed_path =
            crate::paths::build_attack_path(&model, &[(0, 1), (1, 2)], None, &mut rng).unwrap();

        let mut generator = SteeringGenerator::new(
            Arc::clone(&model),
            AttackPathQuery::default(),
            SteeringOptions {
                sample_size: 50,
                seed: Some(47),
                ..Default::default()
            },
        )
        .unwrap();

        let (query_paths, nonquery_paths) =
            generator.bootstrap(&[seed_path.trace.clone()]).unwrap();
        assert_eq!(generator.iteration(), 1);
        assert_eq!(query_paths.len(), 1);
        assert!(nonquery_paths.is_empty());
        assert_eq!(generator.unique_count(), 1);
        assert_eq!(generator.last_precision(), 1.0);
        assert_eq!(generator.steering_history(), &[false]);
        assert_eq!(query_paths[0].trace, seed_path.trace);
    }
}
