//! Weighted random walks over the reachability graph.
//!
//! A `PathSampler` produces reachability paths (edge sequences, no
//! vulnerabilities yet) according to a pluggable strategy. With dynamic
//! weights enabled, every completed path reinforces the edges around its
//! middle with a bell-shaped pattern, so later walks are drawn toward the
//! regions paths actually traverse. The weights are periodically shrunk to
//! stop early bursts from dominating forever.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand_distr::Normal;

use steerag_core::metrics::ABSOLUTE_MAX_LENGTH;
use steerag_core::AttackGraphModel;

use crate::error::{EngineError, Result};

/// A directed reachability edge between two host ids.
pub type Edge = (u32, u32);

/// Initial weight assigned to every edge.
const INITIAL_EDGE_WEIGHT: u32 = 4;
/// Number of sampled paths between weight-decay sweeps.
const DECAY_INTERVAL: u64 = 200;

/// How a sampler picks its paths.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Start anywhere, walk forward.
    Uniform,
    /// Start from one of the given hosts, walk forward.
    StartingAt(Vec<u32>),
    /// End at one of the given hosts, walk backward.
    EndingAt(Vec<u32>),
    /// Pass through one of the given hosts: a forward and a backward walk
    /// share the pivot and a common visited set.
    PassingThrough(Vec<u32>),
    /// Start from a source and keep only walks reaching a target. The
    /// walk budget is twice the BFS distance between the chosen pair.
    SourceTarget {
        sources: Vec<u32>,
        targets: Vec<u32>,
        distances: HashMap<Edge, usize>,
    },
}

impl Strategy {
    pub fn source_target(sources: Vec<u32>, targets: Vec<u32>) -> Self {
        Strategy::SourceTarget {
            sources,
            targets,
            distances: HashMap::new(),
        }
    }
}

/// Construction parameters for [`PathSampler`].
#[derive(Debug, Clone)]
pub struct SamplerOptions {
    /// Minimum length the sampler aims for (not guaranteed).
    pub min_length: Option<usize>,
    /// Maximum length of any sampled path, capped at 40.
    pub max_length: Option<usize>,
    /// Restrict valid hosts to this set.
    pub hosts: Option<HashSet<u32>>,
    pub strategy: Strategy,
    pub use_dynamic_weights: bool,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            min_length: None,
            max_length: None,
            hosts: None,
            strategy: Strategy::Uniform,
            use_dynamic_weights: true,
        }
    }
}

/// Internal plan extracted from the strategy before walking, so the walk
/// itself can borrow the sampler mutably.
enum WalkPlan {
    Skip,
    OneEnd {
        start: u32,
        length: usize,
        forward: bool,
    },
    TwoEnds {
        pivot: u32,
        first: usize,
        second: usize,
    },
    Budgeted {
        start: u32,
        steps: usize,
    },
}

/// Samples reachability paths over an attack graph model.
pub struct PathSampler {
    model: Arc<AttackGraphModel>,
    min_length: usize,
    max_length: usize,
    strategy: Strategy,
    /// Hosts with at least one incident edge (restricted by the filter).
    valid_hosts: Vec<u32>,
    sampled: u64,
    use_dynamic_weights: bool,
    edge_weights: HashMap<Edge, u32>,
    /// Reinforcement pattern per path length, index = length.
    patterns: Vec<Vec<u32>>,
    length_dist: Normal<f64>,
}

impl PathSampler {
    pub fn new(model: Arc<AttackGraphModel>, options: SamplerOptions) -> Result<Self> {
        let max_param = match options.max_length {
            Some(m) if m > ABSOLUTE_MAX_LENGTH => return Err(EngineError::LengthCeiling(m)),
            Some(m) => m,
            None => ABSOLUTE_MAX_LENGTH,
        };
        let min_length = options.min_length.map(|m| m.max(1)).unwrap_or(1);

        let valid_hosts: Vec<u32> = model
            .host_ids()
            .iter()
            .copied()
            .filter(|&id| model.out_degree(id) > 0 || model.in_degree(id) > 0)
            .filter(|id| options.hosts.as_ref().map_or(true, |set| set.contains(id)))
            .collect();

        let max_length = max_param.min(valid_hosts.len()).min(ABSOLUTE_MAX_LENGTH);
        if min_length > max_length {
            return Err(EngineError::InvalidLengthBounds {
                min: min_length,
                max: max_length,
            });
        }

        let edge_weights = model
            .edges()
            .iter()
            .map(|&edge| (edge, INITIAL_EDGE_WEIGHT))
            .collect();

        let mean = (max_length - min_length + 1) as f64 / 2.0;
        let length_dist =
            Normal::new(mean, mean / 3.0).expect("length distribution parameters are positive");

        let mut sampler = Self {
            model,
            min_length,
            max_length,
            strategy: options.strategy,
            valid_hosts,
            sampled: 0,
            use_dynamic_weights: options.use_dynamic_weights,
            edge_weights,
            patterns: weight_patterns(),
            length_dist,
        };
        sampler.init_strategy();
        Ok(sampler)
    }

    /// Sample one reachability path; empty when the strategy produced
    /// nothing usable.
    pub fn sample_path<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<Edge> {
        let plan = self.plan(rng);

        let path = match plan {
            WalkPlan::Skip => Vec::new(),
            WalkPlan::OneEnd {
                start,
                length,
                forward,
            } => {
                let mut visited = HashSet::new();
                self.walk_one_end(start, length, forward, &mut visited, rng)
            }
            WalkPlan::TwoEnds {
                pivot,
                first,
                second,
            } => {
                let mut visited = HashSet::new();
                let head = self.walk_one_end(pivot, first, true, &mut visited, rng);
                let mut path = self.walk_one_end(pivot, second, false, &mut visited, rng);
                // The backward half already reads source → pivot; the
                // forward half continues pivot → target.
                path.extend(head);
                path
            }
            WalkPlan::Budgeted { start, steps } => {
                let mut visited = HashSet::new();
                let path = self.walk_one_end(start, steps, true, &mut visited, rng);
                match path.last() {
                    Some(&(_, reached)) if self.is_target(reached) => path,
                    _ => Vec::new(),
                }
            }
        };

        if self.use_dynamic_weights {
            self.update_weights(&path);
        }
        path
    }

    /// Apply the weight updates for a path obtained elsewhere (bootstrap
    /// traces injected into a new query).
    pub fn record_external_path(&mut self, path: &[Edge]) {
        if self.use_dynamic_weights {
            self.update_weights(path);
        }
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn valid_hosts(&self) -> &[u32] {
        &self.valid_hosts
    }

    pub fn use_dynamic_weights(&self) -> bool {
        self.use_dynamic_weights
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Restrict strategy host lists to valid hosts and precompute whatever
    /// the strategy needs before its first sample.
    fn init_strategy(&mut self) {
        let mut strategy = std::mem::replace(&mut self.strategy, Strategy::Uniform);

        match &mut strategy {
            Strategy::Uniform => {}
            Strategy::StartingAt(hosts)
            | Strategy::EndingAt(hosts)
            | Strategy::PassingThrough(hosts) => {
                hosts.retain(|h| self.valid_hosts.contains(h));
            }
            Strategy::SourceTarget {
                sources,
                targets,
                distances,
            } => {
                sources.retain(|h| self.valid_hosts.contains(h));
                targets.retain(|h| self.valid_hosts.contains(h));
                self.use_dynamic_weights = true;

                for &source in sources.iter() {
                    for &target in targets.iter() {
                        if let Some(distance) = bfs_distance(&self.model, source, target) {
                            distances.insert((source, target), distance);
                        }
                    }
                }

                if distances.is_empty() {
                    tracing::error!("no reachability path between any source/target pair");
                    for &source in sources.iter() {
                        for &target in targets.iter() {
                            distances.insert((source, target), ABSOLUTE_MAX_LENGTH);
                        }
                    }
                }
            }
        }

        self.strategy = strategy;
    }

    fn plan<R: Rng + ?Sized>(&self, rng: &mut R) -> WalkPlan {
        match &self.strategy {
            Strategy::Uniform => match self.valid_hosts.choose(rng) {
                Some(&start) => WalkPlan::OneEnd {
                    start,
                    length: self.sample_length(rng),
                    forward: true,
                },
                None => WalkPlan::Skip,
            },
            Strategy::StartingAt(hosts) => match hosts.choose(rng) {
                Some(&start) => WalkPlan::OneEnd {
                    start,
                    length: self.sample_length(rng),
                    forward: true,
                },
                None => WalkPlan::Skip,
            },
            Strategy::EndingAt(hosts) => match hosts.choose(rng) {
                Some(&start) => WalkPlan::OneEnd {
                    start,
                    length: self.sample_length(rng),
                    forward: false,
                },
                None => WalkPlan::Skip,
            },
            Strategy::PassingThrough(hosts) => match hosts.choose(rng) {
                Some(&pivot) => {
                    let length = self.sample_length(rng);
                    let first = rng.gen_range(0..=length);
                    WalkPlan::TwoEnds {
                        pivot,
                        first,
                        second: length - first,
                    }
                }
                None => WalkPlan::Skip,
            },
            Strategy::SourceTarget {
                sources,
                targets,
                distances,
            } => {
                let Some(&source) = sources.choose(rng) else {
                    return WalkPlan::Skip;
                };
                if targets.iter().all(|&t| t == source) {
                    return WalkPlan::Skip;
                }
                let mut target = *targets.choose(rng).expect("targets checked non-empty");
                while target == source {
                    target = *targets.choose(rng).expect("targets checked non-empty");
                }
                let distance = distances
                    .get(&(source, target))
                    .copied()
                    .unwrap_or(ABSOLUTE_MAX_LENGTH);
                WalkPlan::Budgeted {
                    start: source,
                    steps: distance * 2,
                }
            }
        }
    }

    fn is_target(&self, host: u32) -> bool {
        match &self.strategy {
            Strategy::SourceTarget { targets, .. } => targets.contains(&host),
            _ => false,
        }
    }

    /// Walk up to `max_len` steps from `start`. Forward walks append
    /// `(current, next)`; backward walks consult predecessors and prepend
    /// `(next, current)`, so the edge sequence always reads source → target.
    fn walk_one_end<R: Rng + ?Sized>(
        &mut self,
        start: u32,
        max_len: usize,
        forward: bool,
        visited: &mut HashSet<u32>,
        rng: &mut R,
    ) -> Vec<Edge> {
        visited.insert(start);
        let mut path = VecDeque::with_capacity(max_len.min(ABSOLUTE_MAX_LENGTH));
        let mut current = start;

        for _ in 0..max_len {
            let Some(next) = self.sample_next_host(current, visited, forward, rng) else {
                break;
            };
            visited.insert(next);
            if forward {
                path.push_back((current, next));
            } else {
                path.push_front((next, current));
            }
            current = next;
        }

        path.into()
    }

    /// Pick the next host from the unvisited neighbors in the walk
    /// direction, weighted by the edge weights when enabled.
    fn sample_next_host<R: Rng + ?Sized>(
        &self,
        current: u32,
        visited: &HashSet<u32>,
        forward: bool,
        rng: &mut R,
    ) -> Option<u32> {
        let neighbors: Vec<u32> = if forward {
            self.model.successors(current)
        } else {
            self.model.predecessors(current)
        }
        .iter()
        .copied()
        .filter(|h| !visited.contains(h))
        .collect();

        match neighbors.len() {
            0 => None,
            1 => Some(neighbors[0]),
            2 => {
                let (a, b) = (neighbors[0], neighbors[1]);
                if self.use_dynamic_weights {
                    let wa = self.edge_weight(current, a, forward) as f64;
                    let wb = self.edge_weight(current, b, forward) as f64;
                    Some(if rng.gen::<f64>() < wa / (wa + wb) { a } else { b })
                } else {
                    Some(if rng.gen::<f64>() < 0.5 { a } else { b })
                }
            }
            _ => {
                if self.use_dynamic_weights {
                    let weights: Vec<u32> = neighbors
                        .iter()
                        .map(|&h| self.edge_weight(current, h, forward))
                        .collect();
                    let index = WeightedIndex::new(&weights).ok()?;
                    Some(neighbors[index.sample(rng)])
                } else {
                    neighbors.choose(rng).copied()
                }
            }
        }
    }

    fn edge_weight(&self, current: u32, neighbor: u32, forward: bool) -> u32 {
        let edge = if forward {
            (current, neighbor)
        } else {
            (neighbor, current)
        };
        self.edge_weights
            .get(&edge)
            .copied()
            .unwrap_or(INITIAL_EDGE_WEIGHT)
    }

    /// Draw a target length from a Gaussian centered on the middle of the
    /// allowed range; out-of-range draws fall back to a uniform redraw.
    fn sample_length<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let length = self.length_dist.sample(rng) as i64 + self.min_length as i64 - 1;
        if length < self.min_length as i64 || length > self.max_length as i64 {
            rng.gen_range(self.min_length..=self.max_length)
        } else {
            length as usize
        }
    }

    /// Reinforce the edges of a completed path with the bell pattern for
    /// its length, and periodically shrink inflated weights.
    fn update_weights(&mut self, path: &[Edge]) {
        let length = path.len();
        if length >= self.min_length && length <= self.max_length {
            for (weight, edge) in self.patterns[length].iter().zip(path) {
                if let Some(w) = self.edge_weights.get_mut(edge) {
                    *w += weight;
                }
            }
        }

        self.sampled += 1;
        if self.sampled % DECAY_INTERVAL == 0 {
            for w in self.edge_weights.values_mut() {
                if *w >= 100 {
                    *w /= 100;
                }
            }
        }
    }
}

/// Symmetric triangle of `n` integers peaking at the middle, e.g. `n = 5`
/// gives `0 1 2 1 0`.
fn triangular_pattern(n: i64) -> Vec<u32> {
    if n <= 0 {
        return Vec::new();
    }
    let n = n - 1;
    let peak = n / 2;
    let rising: Vec<u32> = (0..=peak as u32).collect();
    let falling = if n % 2 == 0 {
        &rising[..rising.len() - 1]
    } else {
        &rising[..]
    };

    let mut pattern = rising.clone();
    pattern.extend(falling.iter().rev());
    pattern
}

/// One reinforcement pattern per path length: a triangle framed by a
/// leading zero and two trailing zeros, so path endpoints stay neutral.
fn weight_patterns() -> Vec<Vec<u32>> {
    (0..=ABSOLUTE_MAX_LENGTH as i64)
        .map(|length| {
            let mut pattern = vec![0];
            pattern.extend(triangular_pattern(length - 3));
            pattern.extend([0, 0]);
            pattern
        })
        .collect()
}

/// Shortest-path length from `source` to `target` by breadth-first search.
fn bfs_distance(model: &AttackGraphModel, source: u32, target: u32) -> Option<usize> {
    let mut visited = HashSet::from([source]);
    let mut queue = VecDeque::from([(source, 0usize)]);

    while let Some((host, distance)) = queue.pop_front() {
        if host == target {
            return Some(distance);
        }
        for &next in model.successors(host) {
            if visited.insert(next) {
                queue.push_back((next, distance + 1));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{chain_model, diamond_model};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn triangular_patterns_peak_in_the_middle() {
        assert_eq!(triangular_pattern(5), vec![0, 1, 2, 1, 0]);
        assert_eq!(triangular_pattern(4), vec![0, 1, 1, 0]);
        assert_eq!(triangular_pattern(1), vec![0]);
        assert!(triangular_pattern(0).is_empty());
        assert!(triangular_pattern(-2).is_empty());
    }

    #[test]
    fn weight_patterns_frame_the_triangle() {
        let patterns = weight_patterns();
        assert_eq!(patterns.len(), ABSOLUTE_MAX_LENGTH + 1);
        assert_eq!(patterns[2], vec![0, 0, 0]);
        assert_eq!(patterns[8], vec![0, 0, 1, 2, 1, 0, 0, 0]);
        for (length, pattern) in patterns.iter().enumerate().skip(3) {
            assert_eq!(pattern.len(), length);
            assert_eq!(pattern[0], 0);
            assert_eq!(pattern[pattern.len() - 1], 0);
        }
    }

    #[test]
    fn valid_hosts_exclude_isolated() {
        // chain_model adds an isolated host with id 100.
        let model = Arc::new(chain_model(4, true));
        let sampler = PathSampler::new(model, SamplerOptions::default()).unwrap();
        assert!(!sampler.valid_hosts().contains(&100));
        assert_eq!(sampler.valid_hosts().len(), 4);
    }

    #[test]
    fn lengths_stay_in_range() {
        let model = Arc::new(diamond_model());
        let sampler = PathSampler::new(
            Arc::clone(&model),
            SamplerOptions {
                min_length: Some(1),
                max_length: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        for _ in 0..500 {
            let length = sampler.sample_length(&mut rng);
            assert!((1..=3).contains(&length));
        }
    }

    #[test]
    fn rejects_inverted_bounds() {
        let model = Arc::new(diamond_model());
        let err = PathSampler::new(
            model,
            SamplerOptions {
                min_length: Some(10),
                max_length: Some(3),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(EngineError::InvalidLengthBounds { .. })));
    }

    #[test]
    fn rejects_lengths_beyond_ceiling() {
        let model = Arc::new(diamond_model());
        let err = PathSampler::new(
            model,
            SamplerOptions {
                max_length: Some(90),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(EngineError::LengthCeiling(90))));
    }

    #[test]
    fn uniform_paths_follow_model_edges() {
        let model = Arc::new(diamond_model());
        let mut sampler =
            PathSampler::new(Arc::clone(&model), SamplerOptions::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..200 {
            let path = sampler.sample_path(&mut rng);
            for window in path.windows(2) {
                // Consecutive edges chain.
                assert_eq!(window[0].1, window[1].0);
            }
            for &(source, target) in &path {
                assert!(model.successors(source).contains(&target));
            }
        }
    }

    #[test]
    fn starting_at_pins_the_source() {
        let model = Arc::new(chain_model(5, false));
        let mut sampler = PathSampler::new(
            model,
            SamplerOptions {
                strategy: Strategy::StartingAt(vec![1]),
                ..Default::default()
            },
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(5);

        for _ in 0..50 {
            let path = sampler.sample_path(&mut rng);
            if let Some(&(source, _)) = path.first() {
                assert_eq!(source, 1);
            }
        }
    }

    #[test]
    fn ending_at_pins_the_target_and_reads_forward() {
        let model = Arc::new(chain_model(5, false));
        let mut sampler = PathSampler::new(
            Arc::clone(&model),
            SamplerOptions {
                strategy: Strategy::EndingAt(vec![4]),
                ..Default::default()
            },
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(5);

        let mut saw_path = false;
        for _ in 0..50 {
            let path = sampler.sample_path(&mut rng);
            if let Some(&(_, target)) = path.last() {
                saw_path = true;
                assert_eq!(target, 4);
                // Backward walks still emit forward-pointing model edges.
                for &(source, target) in &path {
                    assert!(model.successors(source).contains(&target));
                }
            }
        }
        assert!(saw_path);
    }

    #[test]
    fn passing_through_visits_pivot_once() {
        let model = Arc::new(chain_model(7, false));
        let mut sampler = PathSampler::new(
            model,
            SamplerOptions {
                strategy: Strategy::PassingThrough(vec![3]),
                ..Default::default()
            },
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..100 {
            let path = sampler.sample_path(&mut rng);
            if path.is_empty() {
                continue;
            }
            // Pivot appears as a junction: at most once as a source and
            // once as a target, and the edges chain through it.
            for window in path.windows(2) {
                assert_eq!(window[0].1, window[1].0);
            }
            let through = path
                .iter()
                .filter(|&&(s, t)| s == 3 || t == 3)
                .count();
            assert!(through >= 1, "pivot missing from {path:?}");
            assert!(through <= 2);
        }
    }

    #[test]
    fn source_target_paths_end_at_targets() {
        let model = Arc::new(diamond_model());
        let mut sampler = PathSampler::new(
            model,
            SamplerOptions {
                strategy: Strategy::source_target(vec![0], vec![3]),
                use_dynamic_weights: false,
                ..Default::default()
            },
        )
        .unwrap();
        // The strategy forces dynamic weights back on.
        assert!(sampler.use_dynamic_weights());
        let mut rng = StdRng::seed_from_u64(13);

        let mut non_empty = 0;
        for _ in 0..200 {
            let path = sampler.sample_path(&mut rng);
            if path.is_empty() {
                continue;
            }
            non_empty += 1;
            assert_eq!(path.first().unwrap().0, 0);
            assert_eq!(path.last().unwrap().1, 3);
        }
        assert!(non_empty > 0);
    }

    #[test]
    fn source_target_precomputes_bfs_distances() {
        let model = Arc::new(chain_model(4, false));
        let sampler = PathSampler::new(
            model,
            SamplerOptions {
                strategy: Strategy::source_target(vec![0], vec![3]),
                ..Default::default()
            },
        )
        .unwrap();

        match sampler.strategy() {
            Strategy::SourceTarget { distances, .. } => {
                assert_eq!(distances.get(&(0, 3)), Some(&3));
            }
            other => panic!("unexpected strategy {other:?}"),
        }
    }

    #[test]
    fn weights_reinforce_sampled_paths() {
        let model = Arc::new(chain_model(8, false));
        let mut sampler = PathSampler::new(
            Arc::clone(&model),
            SamplerOptions {
                min_length: Some(5),
                max_length: Some(8),
                ..Default::default()
            },
        )
        .unwrap();

        // A length-5 path reinforces its middle edges with 0 1 2 1 0
        // padded to 0 [..] 0 0.
        sampler.update_weights(&[(0, 1), (1, 2), (2, 3), (3, 4), (4, 5)]);
        assert_eq!(sampler.edge_weights[&(0, 1)], 4);
        assert_eq!(sampler.edge_weights[&(1, 2)], 4);
        assert_eq!(sampler.edge_weights[&(2, 3)], 5);
        assert_eq!(sampler.edge_weights[&(3, 4)], 4);
        assert_eq!(sampler.edge_weights[&(4, 5)], 4);

        // Out-of-range lengths leave the weights alone.
        sampler.update_weights(&[(0, 1)]);
        assert_eq!(sampler.edge_weights[&(0, 1)], 4);
    }

    #[test]
    fn weights_decay_every_200_paths() {
        let model = Arc::new(chain_model(3, false));
        let mut sampler =
            PathSampler::new(model, SamplerOptions::default()).unwrap();
        *sampler.edge_weights.get_mut(&(0, 1)).unwrap() = 450;
        *sampler.edge_weights.get_mut(&(1, 2)).unwrap() = 80;

        for _ in 0..DECAY_INTERVAL {
            sampler.update_weights(&[]);
        }
        assert_eq!(sampler.edge_weights[&(0, 1)], 4);
        assert_eq!(sampler.edge_weights[&(1, 2)], 80);
    }

    #[test]
    fn bfs_distance_finds_shortest() {
        let model = diamond_model();
        assert_eq!(bfs_distance(&model, 0, 3), Some(2));
        assert_eq!(bfs_distance(&model, 0, 0), Some(0));
        assert_eq!(bfs_distance(&model, 3, 0), None);
    }
}
