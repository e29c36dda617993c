//! The unconstrained path generator ("StatAG").
//!
//! One `step` samples a batch of reachability walks, converts them to
//! attack paths, drops duplicates against everything generated before,
//! updates the statistics and stability, and persists the fresh unique
//! paths. There is no intrinsic convergence test; the monitoring side
//! decides when to stop stepping.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use steerag_core::metrics::Stability;
use steerag_core::AttackGraphModel;
use steerag_store::{IterationLog, IterationRow, PathRecord, PathStore};

use crate::error::Result;
use crate::paths::{build_attack_path, AttackPath};
use crate::sampling::{PathSampler, SamplerOptions};

/// Construction parameters for [`PathGenerator`].
#[derive(Debug, Clone, Default)]
pub struct GeneratorOptions {
    /// Reachability walks attempted per iteration (0 means the default
    /// of 100).
    pub sample_size: usize,
    pub max_length: Option<usize>,
    /// Persist generated paths to this store file.
    pub store_path: Option<PathBuf>,
    /// Append iteration summaries to this CSV file.
    pub csv_path: Option<PathBuf>,
    /// Fixed RNG seed, for reproducible runs and tests.
    pub seed: Option<u64>,
}

/// Summary of one completed iteration.
#[derive(Debug, Clone)]
pub struct IterationSummary {
    pub iteration: u64,
    /// Unique paths produced by this iteration.
    pub generated: u64,
    pub collision: f64,
    /// `None` for the first iteration.
    pub stability: Option<Stability>,
    pub time_secs: f64,
}

/// Unconstrained attack-path generator over a shared model.
pub struct PathGenerator {
    pub(crate) model: Arc<AttackGraphModel>,
    pub(crate) sampler: PathSampler,
    pub(crate) sample_size: usize,

    pub(crate) iteration: u64,
    pub(crate) unique_hashes: HashSet<String>,
    pub(crate) generated: Vec<u64>,
    pub(crate) collision: Vec<f64>,
    pub(crate) times: Vec<f64>,

    pub(crate) statistics: crate::stats::Statistics,
    pub(crate) stability_tracker: crate::stats::StabilityTracker,
    pub(crate) stability: Vec<Stability>,

    pub(crate) store: Option<PathStore>,
    pub(crate) log: Option<IterationLog>,
    pub(crate) rng: StdRng,
}

impl PathGenerator {
    pub fn new(model: Arc<AttackGraphModel>, options: GeneratorOptions) -> Result<Self> {
        let sampler = PathSampler::new(
            Arc::clone(&model),
            SamplerOptions {
                max_length: options.max_length,
                ..Default::default()
            },
        )?;
        Self::with_sampler(model, sampler, options, false)
    }

    /// Build around a pre-configured sampler (used by the steering
    /// generator, whose sampler derives from the query).
    pub(crate) fn with_sampler(
        model: Arc<AttackGraphModel>,
        sampler: PathSampler,
        options: GeneratorOptions,
        precision_column: bool,
    ) -> Result<Self> {
        let store = options.store_path.map(PathStore::create).transpose()?;
        let log = options
            .csv_path
            .map(|path| IterationLog::create(path, precision_column))
            .transpose()?;
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            model,
            sampler,
            sample_size: if options.sample_size == 0 {
                100
            } else {
                options.sample_size
            },
            iteration: 0,
            unique_hashes: HashSet::new(),
            generated: Vec::new(),
            collision: Vec::new(),
            times: Vec::new(),
            statistics: crate::stats::Statistics::new(),
            stability_tracker: crate::stats::StabilityTracker::new(),
            stability: Vec::new(),
            store,
            log,
            rng,
        })
    }

    /// Run one iteration, returning the fresh unique paths.
    pub fn step(&mut self) -> Result<Vec<AttackPath>> {
        let start = Instant::now();
        let attack_paths = self.sample_attack_paths(None);

        // Persist before the in-memory aggregates so an I/O failure leaves
        // the statistics untouched for this iteration.
        self.persist(&attack_paths)?;

        if let Some(stability) = self.stability_tracker.update(&attack_paths) {
            self.stability.push(stability);
        }
        self.statistics.update(&attack_paths);
        self.times.push(start.elapsed().as_secs_f64());

        self.iteration += 1;
        self.log_iteration(None)?;
        Ok(attack_paths)
    }

    /// Sample up to `sample_size` walks and convert them to attack paths,
    /// dropping duplicates of anything generated before. Updates the
    /// generated/collision accounting for this iteration.
    pub(crate) fn sample_attack_paths(
        &mut self,
        preferred: Option<&HashSet<String>>,
    ) -> Vec<AttackPath> {
        let mut attack_paths = Vec::new();
        let mut sampled = 0u64;
        let mut collisions = 0u64;

        for _ in 0..self.sample_size {
            let walk = self.sampler.sample_path(&mut self.rng);
            if walk.is_empty() {
                continue;
            }
            let Some(path) = build_attack_path(&self.model, &walk, preferred, &mut self.rng)
            else {
                continue;
            };

            sampled += 1;
            if self.unique_hashes.contains(&path.hash) {
                collisions += 1;
            } else {
                self.unique_hashes.insert(path.hash.clone());
                attack_paths.push(path);
            }
        }

        self.generated.push(sampled - collisions);
        self.collision.push(if sampled > 0 {
            collisions as f64 / sampled as f64
        } else {
            0.0
        });
        attack_paths
    }

    /// Append this iteration's unique paths to the store, tagged with the
    /// current iteration index.
    pub(crate) fn persist(&mut self, paths: &[AttackPath]) -> Result<()> {
        if let Some(store) = &mut self.store {
            let records: Vec<PathRecord> = paths.iter().map(AttackPath::record).collect();
            store.append_batch(&records, self.iteration)?;
        }
        Ok(())
    }

    /// Write the just-finished iteration to the CSV log and trace it.
    pub(crate) fn log_iteration(&mut self, precision: Option<f64>) -> Result<()> {
        let summary = self.iteration_summary(self.iteration - 1);
        tracing::debug!(
            iteration = summary.iteration,
            generated = summary.generated,
            collision = summary.collision,
            time_secs = summary.time_secs,
            "Iteration complete"
        );

        if let Some(log) = &mut self.log {
            log.append(&IterationRow {
                iteration: summary.iteration,
                generated: summary.generated,
                collision: summary.collision,
                precision,
                stability: summary.stability,
                time_secs: summary.time_secs,
            })?;
        }
        Ok(())
    }

    /// Summary of a past iteration `i` (zero-based).
    pub fn iteration_summary(&self, i: u64) -> IterationSummary {
        let index = i as usize;
        IterationSummary {
            iteration: i,
            generated: self.generated.get(index).copied().unwrap_or(0),
            collision: self.collision.get(index).copied().unwrap_or(0.0),
            stability: if index == 0 {
                None
            } else {
                self.stability.get(index - 1).copied()
            },
            time_secs: self.times.get(index).copied().unwrap_or(0.0),
        }
    }

    pub fn model(&self) -> &Arc<AttackGraphModel> {
        &self.model
    }

    pub fn sampler(&self) -> &PathSampler {
        &self.sampler
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Total unique paths generated over the lifetime.
    pub fn unique_count(&self) -> u64 {
        self.unique_hashes.len() as u64
    }

    pub fn last_generated(&self) -> u64 {
        self.generated.last().copied().unwrap_or(0)
    }

    pub fn last_collision(&self) -> f64 {
        self.collision.last().copied().unwrap_or(0.0)
    }

    pub fn last_stability(&self) -> Option<Stability> {
        self.stability.last().copied()
    }

    pub fn statistics(&self) -> &crate::stats::Statistics {
        &self.statistics
    }

    pub fn store(&self) -> Option<&PathStore> {
        self.store.as_ref()
    }
}
