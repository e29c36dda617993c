//! External-facing handle over the coordinator and its queries.
//!
//! The pool allocates query ids and colors, issues commands, and keeps
//! the run's `info.json` metadata current in the output directory. Each
//! query's files live under `<output_dir>/query_<id>_*`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use steerag_core::{AttackGraphModel, EngineConfig};
use steerag_engine::AttackPathQuery;

use crate::coordinator::{Command, CoordResult, Coordinator, COORDINATOR_QUEUE_BOUND};
use crate::error::Result;
use crate::shared::{new_shared_map, QuerySharedState, SharedMap};

/// Colors handed to queries in order, reclaimed when a query stops.
const COLOR_POOL: [(u8, u8, u8); 7] = [
    (231, 76, 60),
    (46, 204, 113),
    (241, 196, 15),
    (155, 89, 182),
    (128, 128, 0),
    (241, 149, 72),
    (142, 68, 173),
];

/// Bookkeeping for one query in the pool.
#[derive(Debug, Clone, Serialize)]
pub struct QueryInfo {
    pub id: u32,
    pub name: String,
    pub color: (u8, u8, u8),
    pub paused: bool,
    pub active: bool,
    pub enable_steering: bool,
    pub query: AttackPathQuery,
}

/// A pool of steered queries and the coordinator running them.
pub struct QueryPool {
    queries: Vec<QueryInfo>,
    next_id: u32,
    output_dir: PathBuf,
    color_pool: Vec<(u8, u8, u8)>,

    coordinator: Option<JoinHandle<()>>,
    commands: Sender<Command>,
    results: Receiver<CoordResult>,
    shared: SharedMap,
}

impl QueryPool {
    /// Create (or clear) the output directory and spawn the coordinator.
    pub fn new(
        model: Arc<AttackGraphModel>,
        output_dir: impl Into<PathBuf>,
        config: EngineConfig,
    ) -> Result<Self> {
        let output_dir = output_dir.into();
        create_or_clear_dir(&output_dir)?;

        let (command_tx, command_rx) = bounded(COORDINATOR_QUEUE_BOUND);
        let (result_tx, result_rx) = bounded(COORDINATOR_QUEUE_BOUND);
        let shared = new_shared_map();

        let coordinator = Coordinator::spawn(
            model,
            Arc::clone(&shared),
            command_rx,
            result_tx,
            config,
        );

        Ok(Self {
            queries: Vec::new(),
            next_id: 0,
            output_dir,
            color_pool: COLOR_POOL.to_vec(),
            coordinator: Some(coordinator),
            commands: command_tx,
            results: result_rx,
            shared,
        })
    }

    /// Register a query and ask the coordinator to start its worker.
    pub fn add_query(
        &mut self,
        query: AttackPathQuery,
        name: Option<String>,
        bootstrap: Option<Vec<String>>,
        enable_steering: bool,
    ) -> Result<QueryInfo> {
        let id = self.next_id;
        let color = if self.color_pool.is_empty() {
            (255, 0, 0)
        } else {
            self.color_pool.remove(0)
        };

        let info = QueryInfo {
            id,
            name: name.unwrap_or_else(|| format!("Query {id}")),
            color,
            paused: false,
            active: true,
            enable_steering,
            query: query.clone(),
        };
        self.queries.push(info.clone());

        // Seed the shared slot so readers find the query immediately.
        QuerySharedState::new(id, query.metrics()).publish(&self.shared);

        let path_prefix = self.output_dir.join(format!("query_{id}"));
        self.send(Command::NewQuery {
            id,
            query,
            path_prefix,
            bootstrap,
            enable_steering,
        })?;

        self.write_info()?;
        self.next_id += 1;
        Ok(info)
    }

    /// Request one step from every non-paused query.
    pub fn advance_all(&self) -> Result<()> {
        self.send(Command::AdvanceQueries)
    }

    pub fn stop_query(&mut self, id: u32) -> Result<()> {
        if let Some(info) = self.queries.iter_mut().find(|q| q.id == id) {
            info.active = false;
            self.color_pool.push(info.color);
        }
        self.send(Command::StopQuery { id })?;
        self.write_info()
    }

    pub fn set_paused(&mut self, id: u32, paused: bool) -> Result<()> {
        if let Some(info) = self.queries.iter_mut().find(|q| q.id == id) {
            info.paused = paused;
        }
        self.send(Command::SetPaused { id, paused })
    }

    pub fn rename_query(&mut self, id: u32, name: String) -> Result<()> {
        if let Some(info) = self.queries.iter_mut().find(|q| q.id == id) {
            info.name = name;
        }
        self.write_info()
    }

    pub fn recolor_query(&mut self, id: u32, color: (u8, u8, u8)) -> Result<()> {
        if let Some(info) = self.queries.iter_mut().find(|q| q.id == id) {
            info.color = color;
        }
        self.write_info()
    }

    /// Kick off an analysis; the result arrives on the results queue.
    pub fn start_analysis(&self, id: u32, kind: &str, uuid: Uuid, args: Value) -> Result<()> {
        self.send(Command::StartAnalysis {
            id,
            kind: kind.to_string(),
            uuid,
            args,
        })
    }

    /// Next coordinator result, blocking. `None` once the coordinator is
    /// gone.
    pub fn next_result(&self) -> Option<CoordResult> {
        match self.results.recv() {
            Ok(result) => Some(result),
            Err(_) => {
                tracing::error!("Coordinator terminated while reading results");
                None
            }
        }
    }

    pub fn queries(&self) -> &[QueryInfo] {
        &self.queries
    }

    /// Snapshot of one query's shared state.
    pub fn summary_snapshot(&self, id: u32) -> Option<QuerySharedState> {
        self.shared.read().get(&id).cloned()
    }

    /// Stop every worker and join the coordinator.
    pub fn close(mut self) -> Result<()> {
        self.send(Command::Terminate)?;
        if let Some(handle) = self.coordinator.take() {
            if handle.join().is_err() {
                tracing::error!("Coordinator panicked");
            }
        }
        Ok(())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| crate::error::ServerError::ChannelClosed)
    }

    /// Persist the query roster next to the per-query files.
    fn write_info(&self) -> Result<()> {
        let info = serde_json::json!({
            "saved_at": chrono::Utc::now().to_rfc3339(),
            "queries": self.queries,
        });
        let path = self.output_dir.join("info.json");
        std::fs::write(path, serde_json::to_string_pretty(&info)?)?;
        Ok(())
    }
}

fn create_or_clear_dir(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                std::fs::remove_file(entry.path())?;
            }
        }
    } else {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
