//! CLI driver for the steerag engine.
//!
//! `statag` runs the unconstrained generator against a model file;
//! `steer` runs a single steered query and reports its precision. Both
//! write their store and CSV log into the output directory.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use steerag_core::metrics::MetricRange;
use steerag_core::{AttackGraphModel, EngineConfig};
use steerag_engine::{
    AttackPathQuery, GeneratorOptions, PathGenerator, SteeringGenerator, SteeringOptions,
};

#[derive(Parser)]
#[command(name = "steerag")]
#[command(about = "Interactive attack-graph exploration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Attack graph model file (JSON).
    #[arg(short, long, global = true, default_value = "model.json")]
    model: PathBuf,

    /// Drop host CVEs missing from the pool instead of failing the load.
    #[arg(long, global = true)]
    drop_missing: bool,

    /// Config file prefix (default: steerag).
    #[arg(short, long, default_value = "steerag", global = true)]
    config: String,

    /// Fixed RNG seed.
    #[arg(long, global = true)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the unconstrained generator for a number of iterations.
    Statag {
        /// Iterations to run.
        #[arg(short, long, default_value_t = 100)]
        iterations: u64,
        /// Walks sampled per iteration (overrides the config).
        #[arg(long)]
        sample_size: Option<usize>,
    },
    /// Run one steered query for a number of iterations.
    Steer {
        /// Iterations to run.
        #[arg(short, long, default_value_t = 50)]
        iterations: u64,
        /// Inclusive likelihood bounds.
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
        likelihood: Option<Vec<f64>>,
        /// Inclusive impact bounds.
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
        impact: Option<Vec<f64>>,
        /// Inclusive score bounds.
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
        score: Option<Vec<f64>>,
        /// Inclusive risk bounds.
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
        risk: Option<Vec<f64>>,
        /// Inclusive length bounds.
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
        length: Option<Vec<usize>>,
        /// Source host ids (comma separated).
        #[arg(long, value_delimiter = ',')]
        sources: Option<Vec<u32>>,
        /// Target host ids (comma separated).
        #[arg(long, value_delimiter = ',')]
        targets: Option<Vec<u32>>,
        /// Run the query without steering.
        #[arg(long)]
        no_steering: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config)?;

    let model = Arc::new(AttackGraphModel::load_from_json(&cli.model, cli.drop_missing)?);
    std::fs::create_dir_all(&config.output_dir)?;
    let out = PathBuf::from(&config.output_dir);

    match cli.command {
        Command::Statag {
            iterations,
            sample_size,
        } => {
            let mut generator = PathGenerator::new(
                model,
                GeneratorOptions {
                    sample_size: sample_size.unwrap_or(config.sample_size),
                    max_length: Some(config.max_length),
                    store_path: Some(out.join("statag_aps.db")),
                    csv_path: Some(out.join("statag_stats.csv")),
                    seed: cli.seed,
                },
            )?;

            for _ in 0..iterations {
                generator.step()?;
                let summary = generator.iteration_summary(generator.iteration() - 1);
                tracing::info!(
                    iteration = summary.iteration,
                    generated = summary.generated,
                    collision = summary.collision,
                    stability = summary.stability.map(|s| s.mean()),
                    "StatAG iteration"
                );
            }
            tracing::info!(
                unique = generator.unique_count(),
                "StatAG run complete"
            );
        }

        Command::Steer {
            iterations,
            likelihood,
            impact,
            score,
            risk,
            length,
            sources,
            targets,
            no_steering,
        } => {
            let query = AttackPathQuery {
                likelihood: to_range(likelihood),
                impact: to_range(impact),
                score: to_range(score),
                risk: to_range(risk),
                length: length.map(|bounds| (bounds[0], bounds[1])),
                sources,
                targets,
            };

            let mut generator = SteeringGenerator::new(
                model,
                query,
                SteeringOptions {
                    sample_size: config.steering_sample_size,
                    min_training_size: config.min_training_size,
                    max_training_size: config.max_training_size,
                    store_path: Some(out.join("query_0_aps.db")),
                    csv_path: Some(out.join("query_0_stats.csv")),
                    seed: cli.seed,
                    disable_steering: no_steering,
                },
            )?;

            for _ in 0..iterations {
                let (query_paths, _) = generator.step()?;
                tracing::info!(
                    iteration = generator.iteration() - 1,
                    query_paths = query_paths.len(),
                    precision = generator.last_precision(),
                    steering = generator.steering_history().last().copied().unwrap_or(false),
                    "SteerAG iteration"
                );
            }
            tracing::info!(
                query_unique = generator.query_unique_count(),
                compliant_vulns = generator.steering_compliant_vulns().len(),
                "SteerAG run complete"
            );
        }
    }

    Ok(())
}

fn to_range(bounds: Option<Vec<f64>>) -> Option<MetricRange> {
    bounds.map(|b| MetricRange::new(b[0], b[1]))
}
