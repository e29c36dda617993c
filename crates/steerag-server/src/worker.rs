//! One isolated worker per query.
//!
//! The worker owns its steered generator, its store and CSV files, and
//! its running analysis accumulators. It performs the first step eagerly,
//! then blocks on its command queue; step failures are logged and the
//! worker keeps serving (best effort).

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use steerag_core::metrics::{Metric, MetricCondition};
use steerag_core::{AttackGraphModel, EngineConfig};
use steerag_engine::{AttackPathQuery, SteeringGenerator, SteeringOptions};

use crate::analysis::{
    self, SourceTargetMatrix, TopVulnerabilities, HISTOGRAM_LIMIT, SELECT_LIMIT,
};
use crate::coordinator::{CoordResult, StepDone, WorkerCommand};
use crate::shared::{QuerySharedState, SharedMap};

/// Everything a worker needs at startup.
pub(crate) struct WorkerContext {
    pub id: u32,
    pub model: Arc<AttackGraphModel>,
    pub shared: SharedMap,
    pub query: AttackPathQuery,
    pub path_prefix: PathBuf,
    pub bootstrap: Option<Vec<String>>,
    pub enable_steering: bool,
    pub results: Sender<CoordResult>,
    pub config: EngineConfig,
}

#[derive(Debug, Deserialize)]
struct HistogramArgs {
    query: Vec<MetricCondition>,
    sort: Metric,
    #[serde(default = "default_histogram_limit")]
    n: usize,
}

fn default_histogram_limit() -> usize {
    HISTOGRAM_LIMIT
}

#[derive(Debug, Deserialize)]
struct SelectArgs {
    filter: Vec<MetricCondition>,
    #[serde(default = "default_select_limit")]
    n: usize,
}

fn default_select_limit() -> usize {
    SELECT_LIMIT
}

/// Worker thread entry point.
pub(crate) fn run_query(
    context: WorkerContext,
    commands: Receiver<WorkerCommand>,
    step_done: Sender<StepDone>,
) {
    let id = context.id;
    let store_path = suffixed(&context.path_prefix, "_aps.db");
    let csv_path = suffixed(&context.path_prefix, "_stats.csv");

    let mut generator = match SteeringGenerator::new(
        Arc::clone(&context.model),
        context.query.clone(),
        SteeringOptions {
            sample_size: context.config.steering_sample_size,
            min_training_size: context.config.min_training_size,
            max_training_size: context.config.max_training_size,
            store_path: Some(store_path),
            csv_path: Some(csv_path),
            seed: None,
            disable_steering: !context.enable_steering,
        },
    ) {
        Ok(generator) => generator,
        Err(e) => {
            tracing::error!(query_id = id, error = %e, "Failed to build generator");
            return;
        }
    };

    let mut matrix = SourceTargetMatrix::new(&context.model);
    let mut top_vulns = TopVulnerabilities::new();
    let mut state = QuerySharedState::new(id, context.query.metrics());

    if let Some(traces) = &context.bootstrap {
        match generator.bootstrap(traces) {
            Ok((query_paths, _)) => {
                matrix.update(&query_paths, generator.iteration());
                top_vulns.update(&query_paths, generator.iteration());
            }
            Err(e) => tracing::error!(query_id = id, error = %e, "Bootstrap failed"),
        }
    }

    // Initial step: publish the first summary before signaling readiness.
    match generator.step() {
        Ok((query_paths, _)) => {
            state.update(&generator);
            state.publish(&context.shared);
            let _ = step_done.send(StepDone);
            matrix.update(&query_paths, generator.iteration());
            top_vulns.update(&query_paths, generator.iteration());
        }
        Err(e) => {
            tracing::error!(query_id = id, error = %e, "Initial step failed");
            return;
        }
    }

    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Step => {
                match generator.step() {
                    Ok((query_paths, _)) => {
                        matrix.update(&query_paths, generator.iteration());
                        top_vulns.update(&query_paths, generator.iteration());
                        state.update(&generator);
                        state.publish(&context.shared);
                    }
                    Err(e) => tracing::error!(query_id = id, error = %e, "Step failed"),
                }
                let _ = step_done.send(StepDone);
            }
            WorkerCommand::Stop => {
                tracing::info!(query_id = id, "Stopping generator");
                break;
            }
            WorkerCommand::StartAnalysis { kind, uuid, args } => {
                run_analysis(&context, &generator, &matrix, &top_vulns, &kind, uuid, args);
            }
        }
    }
}

fn run_analysis(
    context: &WorkerContext,
    generator: &SteeringGenerator,
    matrix: &SourceTargetMatrix,
    top_vulns: &TopVulnerabilities,
    kind: &str,
    uuid: Uuid,
    args: Value,
) {
    let id = context.id;
    match kind {
        "attack_source_target_matrix" => {
            send_analysis(context, uuid, matrix.result());
            tracing::info!(query_id = id, "Sent attack source/target matrix");
        }
        "top_vulnerabilities" => {
            send_analysis(context, uuid, top_vulns.result());
            tracing::info!(query_id = id, "Sent top vulnerabilities");
        }
        "attack_path_histogram" => {
            let parsed: HistogramArgs = match serde_json::from_value(args) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(query_id = id, error = %e, "Bad histogram arguments");
                    return;
                }
            };
            let Some(store) = generator.store() else {
                tracing::error!(query_id = id, "No path store attached");
                return;
            };
            match analysis::attack_path_histogram(store, &parsed.query, parsed.sort, parsed.n) {
                Ok(paths) => {
                    send_analysis(
                        context,
                        uuid,
                        serde_json::json!({
                            "iteration": generator.iteration(),
                            "metric": parsed.sort,
                            "paths": paths,
                        }),
                    );
                    tracing::info!(query_id = id, metric = %parsed.sort, "Sent path histogram");
                }
                Err(e) => tracing::error!(query_id = id, error = %e, "Histogram failed"),
            }
        }
        "select_attack_paths" => {
            let parsed: SelectArgs = match serde_json::from_value(args) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(query_id = id, error = %e, "Bad selection arguments");
                    return;
                }
            };
            let Some(store) = generator.store() else {
                tracing::error!(query_id = id, "No path store attached");
                return;
            };
            match analysis::select_attack_paths(store, &context.model, &parsed.filter, parsed.n)
            {
                Ok(paths) => {
                    let payload: Vec<Value> =
                        paths.iter().map(analysis::path_to_json).collect();
                    send_analysis(context, uuid, Value::Array(payload));
                }
                Err(e) => tracing::error!(query_id = id, error = %e, "Selection failed"),
            }
        }
        other => tracing::warn!(query_id = id, kind = other, "Unknown analysis kind"),
    }
}

fn send_analysis(context: &WorkerContext, uuid: Uuid, data: Value) {
    let result = CoordResult::AnalysisCompleted {
        id: context.id,
        uuid,
        data,
    };
    if context.results.send(result).is_err() {
        tracing::warn!(query_id = context.id, "Results queue closed");
    }
}

/// `prefix` + literal suffix, e.g. `out/query_3` → `out/query_3_aps.db`.
fn suffixed(prefix: &PathBuf, suffix: &str) -> PathBuf {
    let mut path = prefix.as_os_str().to_os_string();
    path.push(suffix);
    PathBuf::from(path)
}
