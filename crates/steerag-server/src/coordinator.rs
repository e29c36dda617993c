//! The multi-query coordinator.
//!
//! One coordinator thread supervises one worker thread per active query.
//! Commands arrive on a bounded inbound queue; results go out on a
//! bounded outbound queue toward the serving layer. Each worker gets its
//! own bounded command and step-done queues, so back-pressure is purely
//! structural and no timeouts are needed at this layer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use serde_json::Value;
use uuid::Uuid;

use steerag_core::{AttackGraphModel, EngineConfig};
use steerag_engine::AttackPathQuery;

use crate::shared::SharedMap;
use crate::worker::{self, WorkerContext};

/// Bound on the per-worker command and step-done queues.
pub(crate) const WORKER_QUEUE_BOUND: usize = 2;
/// Bound on the coordinator's inbound and outbound queues.
pub const COORDINATOR_QUEUE_BOUND: usize = 128;

/// Commands accepted by the coordinator.
#[derive(Debug, Clone)]
pub enum Command {
    NewQuery {
        id: u32,
        query: AttackPathQuery,
        /// Files for this query are created as `<path_prefix>_aps.db` and
        /// `<path_prefix>_stats.csv`.
        path_prefix: PathBuf,
        /// Pre-existing traces injected as iteration 0.
        bootstrap: Option<Vec<String>>,
        enable_steering: bool,
    },
    SetPaused {
        id: u32,
        paused: bool,
    },
    StopQuery {
        id: u32,
    },
    AdvanceQueries,
    StartAnalysis {
        id: u32,
        /// Analysis kind by name; unknown kinds are logged and ignored.
        kind: String,
        uuid: Uuid,
        args: Value,
    },
    Terminate,
}

/// Results emitted toward the serving layer.
#[derive(Debug, Clone)]
pub enum CoordResult {
    QueryStarted { id: u32 },
    /// Ids that completed a step; `None` when no query was running.
    QueriesAdvanced { which: Option<Vec<u32>> },
    AnalysisCompleted { id: u32, uuid: Uuid, data: Value },
    QueryStopped { id: u32 },
    Terminated,
}

/// Commands from the coordinator to one worker.
#[derive(Debug, Clone)]
pub(crate) enum WorkerCommand {
    Step,
    Stop,
    StartAnalysis {
        kind: String,
        uuid: Uuid,
        args: Value,
    },
}

/// Step-completion acknowledgment from a worker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepDone;

/// Handle to one running query worker.
struct QueryProcess {
    id: u32,
    handle: JoinHandle<()>,
    commands: Sender<WorkerCommand>,
    step_done: Receiver<StepDone>,
    paused: bool,
}

/// Supervisor for all query workers.
pub struct Coordinator {
    model: Arc<AttackGraphModel>,
    shared: SharedMap,
    commands: Receiver<Command>,
    results: Sender<CoordResult>,
    config: EngineConfig,
    workers: HashMap<u32, QueryProcess>,
}

impl Coordinator {
    /// Spawn the coordinator thread.
    pub fn spawn(
        model: Arc<AttackGraphModel>,
        shared: SharedMap,
        commands: Receiver<Command>,
        results: Sender<CoordResult>,
        config: EngineConfig,
    ) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("coordinator".to_string())
            .spawn(move || {
                Coordinator {
                    model,
                    shared,
                    commands,
                    results,
                    config,
                    workers: HashMap::new(),
                }
                .run()
            })
            .expect("failed to spawn coordinator thread")
    }

    fn run(mut self) {
        tracing::info!("Coordinator started");

        while let Ok(command) = self.commands.recv() {
            if matches!(command, Command::Terminate) {
                break;
            }
            self.handle(command);
        }

        self.close();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::NewQuery {
                id,
                query,
                path_prefix,
                bootstrap,
                enable_steering,
            } => self.new_query(id, query, path_prefix, bootstrap, enable_steering),

            Command::SetPaused { id, paused } => match self.workers.get_mut(&id) {
                Some(worker) => {
                    tracing::info!(query_id = id, paused, "Query pause state changed");
                    worker.paused = paused;
                }
                None => tracing::warn!(query_id = id, "Query not found"),
            },

            Command::StopQuery { id } => self.stop_query(id),

            Command::AdvanceQueries => self.advance_queries(),

            Command::StartAnalysis {
                id,
                kind,
                uuid,
                args,
            } => match self.workers.get(&id) {
                Some(worker) => {
                    tracing::info!(query_id = id, kind = %kind, "Starting analysis");
                    // Delegated; the worker replies asynchronously.
                    if worker
                        .commands
                        .send(WorkerCommand::StartAnalysis { kind, uuid, args })
                        .is_err()
                    {
                        tracing::error!(query_id = id, "Worker channel closed");
                    }
                }
                None => tracing::warn!(query_id = id, "Query not found"),
            },

            Command::Terminate => unreachable!("handled by the run loop"),
        }
    }

    fn new_query(
        &mut self,
        id: u32,
        query: AttackPathQuery,
        path_prefix: PathBuf,
        bootstrap: Option<Vec<String>>,
        enable_steering: bool,
    ) {
        let (command_tx, command_rx) = bounded(WORKER_QUEUE_BOUND);
        let (done_tx, done_rx) = bounded(WORKER_QUEUE_BOUND);

        let context = WorkerContext {
            id,
            model: Arc::clone(&self.model),
            shared: Arc::clone(&self.shared),
            query,
            path_prefix,
            bootstrap,
            enable_steering,
            results: self.results.clone(),
            config: self.config.clone(),
        };

        let handle = match std::thread::Builder::new()
            .name(format!("query-{id}"))
            .spawn(move || worker::run_query(context, command_rx, done_tx))
        {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(query_id = id, error = %e, "Failed to spawn worker");
                return;
            }
        };
        tracing::info!(query_id = id, "Started generator worker");

        self.workers.insert(
            id,
            QueryProcess {
                id,
                handle,
                commands: command_tx,
                step_done: done_rx,
                paused: true,
            },
        );

        // Wait for the worker's initial step before reporting the query
        // as started, then let it advance with the others.
        match self.workers[&id].step_done.recv() {
            Ok(StepDone) => {
                self.send_result(CoordResult::QueryStarted { id });
                if let Some(worker) = self.workers.get_mut(&id) {
                    worker.paused = false;
                }
            }
            Err(_) => {
                tracing::error!(query_id = id, "Worker died before its first step");
                self.remove_worker(id);
            }
        }
    }

    fn stop_query(&mut self, id: u32) {
        tracing::info!(query_id = id, "Stopping query");
        let Some(worker) = self.workers.remove(&id) else {
            tracing::warn!(query_id = id, "Query not found");
            self.send_result(CoordResult::QueryStopped { id });
            return;
        };

        let _ = worker.commands.send(WorkerCommand::Stop);
        if worker.handle.join().is_err() {
            tracing::error!(query_id = id, "Worker panicked");
        }
        self.send_result(CoordResult::QueryStopped { id });
        tracing::info!(query_id = id, "Query stopped");
    }

    fn advance_queries(&mut self) {
        let running: Vec<u32> = self
            .workers
            .values()
            .filter(|worker| !worker.paused)
            .map(|worker| worker.id)
            .collect();

        if running.is_empty() {
            self.send_result(CoordResult::QueriesAdvanced { which: None });
            return;
        }

        let mut dead = Vec::new();
        for &id in &running {
            if self.workers[&id].commands.send(WorkerCommand::Step).is_err() {
                tracing::error!(query_id = id, "Worker channel closed before step");
                dead.push(id);
            }
        }

        let mut which = Vec::with_capacity(running.len());
        for &id in &running {
            if dead.contains(&id) {
                continue;
            }
            match self.workers[&id].step_done.recv() {
                Ok(StepDone) => which.push(id),
                Err(_) => {
                    tracing::error!(query_id = id, "Worker terminated while advancing");
                    dead.push(id);
                }
            }
        }

        for id in dead {
            self.remove_worker(id);
        }
        self.send_result(CoordResult::QueriesAdvanced { which: Some(which) });
    }

    /// Drop a dead worker so later advances skip it.
    fn remove_worker(&mut self, id: u32) {
        if let Some(worker) = self.workers.remove(&id) {
            let _ = worker.commands.send(WorkerCommand::Stop);
            let _ = worker.handle.join();
        }
    }

    fn close(&mut self) {
        for (_, worker) in self.workers.drain() {
            let _ = worker.commands.send(WorkerCommand::Stop);
            if worker.handle.join().is_err() {
                tracing::error!(query_id = worker.id, "Worker panicked during shutdown");
            }
        }
        tracing::info!("Joined all query workers");
        self.send_result(CoordResult::Terminated);
    }

    fn send_result(&self, result: CoordResult) {
        if self.results.send(result).is_err() {
            tracing::warn!("Results queue closed");
        }
    }
}
