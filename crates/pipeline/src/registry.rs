//! Run registry: one active training run at a time, plus a history of finished runs.
//!
//! [`RunRegistry::run_exclusive`] is the entry point. It refuses to start while
//! another run holds the gate, records the run in memory while it executes, and
//! appends the final record to a JSONL log (`<artifact_root>/runs.jsonl`) so the
//! history survives restarts.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use objdet_core::{ArtifactStore, DataIngestionArtifact};

use crate::error::PipelineError;
use crate::state::PipelineState;
use crate::training::{PipelineOutcome, TrainPipeline};

/// Most recent runs kept in memory.
pub const MAX_TRACKED_RUNS: usize = 100;

/// Error recorded for runs whose caller went away mid-run.
pub const ABORTED_MESSAGE: &str = "run aborted before completion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub artifact: Option<DataIngestionArtifact>,
}

pub struct RunRegistry {
    gate: Mutex<()>,
    runs: RwLock<Vec<RunRecord>>,
    log_path: PathBuf,
}

impl RunRegistry {
    /// Empty registry appending to `log_path`.
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            gate: Mutex::new(()),
            runs: RwLock::new(Vec::new()),
            log_path: log_path.into(),
        }
    }

    /// Registry seeded with the history in `log_path`. Unreadable lines are skipped.
    pub fn open(log_path: impl Into<PathBuf>) -> Self {
        let registry = Self::new(log_path);
        let history = load_history(&registry.log_path);
        if !history.is_empty() {
            info!(runs = history.len(), path = %registry.log_path.display(), "loaded run history");
        }
        *registry.runs.write().unwrap_or_else(PoisonError::into_inner) = history;
        registry
    }

    pub fn for_store(store: &ArtifactStore) -> Self {
        Self::open(store.run_log_path())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Run `pipeline` unless another run is active, in which case `Busy` is returned at once.
    pub async fn run_exclusive(
        &self,
        mut pipeline: TrainPipeline,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let Ok(_gate) = self.gate.try_lock() else {
            let run_id = self
                .active()
                .map(|r| r.run_id)
                .unwrap_or_else(|| "unknown".to_string());
            warn!(active_run = %run_id, "rejecting training request, a run is active");
            return Err(PipelineError::Busy { run_id });
        };

        let run_id = pipeline.run_id().to_string();
        let started_at = Utc::now();
        let guard = RunGuard::start(
            self,
            RunRecord {
                run_id: run_id.clone(),
                status: RunStatus::Running,
                state: PipelineState::Ingesting,
                started_at,
                completed_at: None,
                duration_ms: None,
                error: None,
                artifact: None,
            },
        );

        let result = pipeline.run_pipeline(cancel).await;

        let (status, error, artifact) = match &result {
            Ok(outcome) => (RunStatus::Completed, None, Some(outcome.artifact.clone())),
            Err(e) => (RunStatus::Failed, Some(e.to_string()), None),
        };
        guard.finish(RunRecord {
            run_id,
            status,
            state: pipeline.state(),
            started_at,
            completed_at: Some(Utc::now()),
            duration_ms: None,
            error,
            artifact,
        });

        result
    }

    /// The running record, if any.
    pub fn active(&self) -> Option<RunRecord> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|r| r.status == RunStatus::Running)
            .cloned()
    }

    /// Tracked runs, newest first.
    pub fn list(&self) -> Vec<RunRecord> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.iter().rev().cloned().collect()
    }

    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|r| r.run_id == run_id)
            .cloned()
    }

    /// Record a finished run in memory and in the log.
    fn close(&self, record: RunRecord) {
        append_run_log(&self.log_path, &record);
        self.upsert(record);
    }

    fn upsert(&self, record: RunRecord) {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        match runs.iter_mut().rev().find(|r| r.run_id == record.run_id) {
            Some(existing) => *existing = record,
            None => runs.push(record),
        }
        if runs.len() > MAX_TRACKED_RUNS {
            let excess = runs.len() - MAX_TRACKED_RUNS;
            runs.drain(..excess);
        }
    }
}

// ── Run guard ───────────────────────────────────────────────────────

/// Holds the `Running` record for one run.
///
/// If the run's future is dropped before [`RunGuard::finish`] (a caller that
/// went away mid-run), the record is closed as failed instead of staying `Running`.
struct RunGuard<'a> {
    registry: &'a RunRegistry,
    running: Option<RunRecord>,
    start: Instant,
}

impl<'a> RunGuard<'a> {
    fn start(registry: &'a RunRegistry, record: RunRecord) -> Self {
        registry.upsert(record.clone());
        Self {
            registry,
            running: Some(record),
            start: Instant::now(),
        }
    }

    fn finish(mut self, mut record: RunRecord) {
        self.running = None;
        record.duration_ms = Some(self.elapsed_ms());
        self.registry.close(record);
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let Some(mut record) = self.running.take() else {
            return;
        };
        warn!(run_id = %record.run_id, "training run dropped before completion");
        record.status = RunStatus::Failed;
        record.completed_at = Some(Utc::now());
        record.duration_ms = Some(self.elapsed_ms());
        record.error = Some(ABORTED_MESSAGE.to_string());
        self.registry.close(record);
    }
}

// ── JSONL persistence ───────────────────────────────────────────────

fn load_history(path: &Path) -> Vec<RunRecord> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to open run log");
            return Vec::new();
        }
    };

    let mut runs = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, line = index + 1, "failed to read run log");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RunRecord>(&line) {
            Ok(record) => runs.push(record),
            Err(e) => warn!(error = %e, line = index + 1, "skipping malformed run log entry"),
        }
    }
    if runs.len() > MAX_TRACKED_RUNS {
        runs.drain(..runs.len() - MAX_TRACKED_RUNS);
    }
    runs
}

/// Append one finished run to the log. Each line is self-contained JSON.
fn append_run_log(path: &Path, record: &RunRecord) {
    if let Some(dir) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(error = %e, "failed to create run log directory");
            return;
        }
    }

    let json_line = match serde_json::to_string(record) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "failed to serialize run record");
            return;
        }
    };

    let mut file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to open run log");
            return;
        }
    };

    if let Err(e) = writeln!(file, "{}", json_line) {
        warn!(error = %e, "failed to write run record");
    }
}
