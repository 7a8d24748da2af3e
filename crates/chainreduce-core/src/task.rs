//! Task reduce service — a resumable, cursor-checkpointed full sweep.
//!
//! Wraps the full reduce service with durable progress: after every rebuilt
//! id the JSON-encoded id is saved as the task cursor, so an interrupted run
//! resumes strictly after the last finished entity. One instance drives one
//! task; overlapping runs are rejected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::ReduceError;
use crate::full::{FullReduceService, RebuildOutcome};
use crate::head::HeadSource;
use crate::reduce::Reducer;
use crate::store::{EntityStore, EventHistory, TaskStore};

/// Accounting for one task run.
#[derive(Debug, Clone, Default)]
pub struct TaskReport {
    pub entities: usize,
    pub saved: usize,
    pub failed: usize,
    pub quarantined: Vec<String>,
    /// The cursor id this run resumed after, if any.
    pub resumed_from: Option<String>,
}

pub struct TaskReduceService<R: Reducer, S, H, HS, T> {
    full: Arc<FullReduceService<R, S, H, HS>>,
    history: Arc<H>,
    tasks: Arc<T>,
    task: String,
    running: AtomicBool,
}

impl<R, S, H, HS, T> TaskReduceService<R, S, H, HS, T>
where
    R: Reducer,
    S: EntityStore<R>,
    H: EventHistory<R>,
    HS: HeadSource,
    T: TaskStore,
{
    pub fn new(
        full: Arc<FullReduceService<R, S, H, HS>>,
        history: Arc<H>,
        tasks: Arc<T>,
    ) -> Self {
        Self {
            full,
            history,
            tasks,
            task: format!("{}-reduce", R::ENTITY),
            running: AtomicBool::new(false),
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task
    }

    /// Run the sweep, resuming strictly after the saved cursor.
    ///
    /// Fails with [`ReduceError::TaskRunning`] when a run is already in
    /// flight on this instance.
    pub async fn run(&self) -> Result<TaskReport, ReduceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ReduceError::TaskRunning {
                task: self.task.clone(),
            });
        }
        let result = self.run_inner().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Clear the saved cursor so the next run starts from the beginning.
    pub async fn reset(&self) -> Result<(), ReduceError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ReduceError::TaskRunning {
                task: self.task.clone(),
            });
        }
        self.tasks.delete_cursor(&self.task).await
    }

    async fn run_inner(&self) -> Result<TaskReport, ReduceError> {
        let cursor = self.load_cursor().await?;
        let mut report = TaskReport {
            resumed_from: cursor.as_ref().map(|id| id.to_string()),
            ..TaskReport::default()
        };

        let ids = self.history.ids_after(cursor.as_ref()).await?;
        info!(
            task = %self.task,
            entities = ids.len(),
            resumed = report.resumed_from.is_some(),
            "task reduce started"
        );

        for id in &ids {
            report.entities += 1;
            match self.full.rebuild_one(id).await {
                Ok(RebuildOutcome::Saved) => report.saved += 1,
                Ok(RebuildOutcome::Quarantined) => report.quarantined.push(id.to_string()),
                Ok(_) => {}
                Err(e) => {
                    error!(task = %self.task, id = %id, error = %e, "task rebuild failed");
                    report.failed += 1;
                }
            }
            let encoded =
                serde_json::to_string(id).map_err(|e| ReduceError::Serde(e.to_string()))?;
            self.tasks.save_cursor(&self.task, &encoded).await?;
        }

        info!(
            task = %self.task,
            entities = report.entities,
            saved = report.saved,
            failed = report.failed,
            "task reduce finished"
        );
        Ok(report)
    }

    async fn load_cursor(&self) -> Result<Option<R::Id>, ReduceError> {
        let raw = match self.tasks.load_cursor(&self.task).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match serde_json::from_str(&raw) {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                // An unreadable cursor restarts the sweep; rebuilds are
                // idempotent, so over-covering is safe.
                warn!(task = %self.task, error = %e, "unreadable task cursor, restarting sweep");
                Ok(None)
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
