// src/task/store.rs

//! Authoritative task records and their status transitions.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::SessionId;
use crate::task::model::{Task, TaskId, TaskSpec, TaskStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("illegal transition for {id}: {from} -> {to}")]
    Illegal {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// Legal status edges.
///
/// `Running -> Queued` is the retry path: a retryable failure that is still
/// under the retry limit goes straight back to the queue without being
/// published as `Failed` first.
fn is_legal(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Queued, Running) | (Running, Succeeded) | (Running, Failed) | (Running, Queued)
    )
}

/// Owns every task record, in arrival order.
///
/// All mutation goes through the transition methods below; a terminal task
/// can never be moved again.
#[derive(Debug, Default)]
pub struct TaskStore {
    records: Vec<Task>,
    index: HashMap<TaskId, usize>,
    next_id: u64,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `Queued` record. The caller is responsible for admission
    /// control.
    pub fn insert(&mut self, spec: TaskSpec) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);

        self.index.insert(id, self.records.len());
        self.records.push(Task::new(id, spec));
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.index.get(&id).map(|&i| &self.records[i])
    }

    /// Records in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.records.iter()
    }

    /// `Queued -> Running`, bound to `session`.
    pub fn mark_running(
        &mut self,
        id: TaskId,
        session: SessionId,
        detail: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let task = self.transition(id, TaskStatus::Running)?;
        task.session = Some(session);
        task.status_detail = detail.into();
        task.started_at = Some(Utc::now());
        task.finished_at = None;
        Ok(())
    }

    /// Update the advisory detail of a running task.
    ///
    /// Progress reports that arrive after the task left `Running` are
    /// refused so they cannot overwrite a terminal detail.
    pub fn set_detail(&mut self, id: TaskId, detail: impl Into<String>) -> Result<(), TransitionError> {
        let task = self.get_mut(id)?;
        if task.status != TaskStatus::Running {
            return Err(TransitionError::Illegal {
                id,
                from: task.status,
                to: task.status,
            });
        }
        task.status_detail = detail.into();
        Ok(())
    }

    /// `Running -> Succeeded`.
    pub fn mark_succeeded(
        &mut self,
        id: TaskId,
        saved_dir: PathBuf,
        saved_path: PathBuf,
        detail: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let task = self.transition(id, TaskStatus::Succeeded)?;
        task.session = None;
        task.saved_dir = Some(saved_dir);
        task.saved_path = Some(saved_path);
        task.status_detail = detail.into();
        task.finished_at = Some(Utc::now());
        Ok(())
    }

    /// `Queued -> Succeeded` for a task whose artifact already exists. No
    /// session is ever bound.
    pub fn mark_skipped(
        &mut self,
        id: TaskId,
        saved_dir: PathBuf,
        saved_path: PathBuf,
        detail: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let task = self.get_mut(id)?;
        if task.status != TaskStatus::Queued {
            return Err(TransitionError::Illegal {
                id,
                from: task.status,
                to: TaskStatus::Succeeded,
            });
        }
        task.status = TaskStatus::Succeeded;
        task.saved_dir = Some(saved_dir);
        task.saved_path = Some(saved_path);
        task.status_detail = detail.into();
        task.finished_at = Some(Utc::now());
        Ok(())
    }

    /// `Running -> Queued` after a retryable failure. Returns the new
    /// retry count.
    pub fn requeue_for_retry(
        &mut self,
        id: TaskId,
        detail: impl Into<String>,
    ) -> Result<u32, TransitionError> {
        let task = self.transition(id, TaskStatus::Queued)?;
        task.session = None;
        task.retry_count += 1;
        task.status_detail = detail.into();
        task.started_at = None;
        debug!(task = %id, retry_count = task.retry_count, "task requeued for retry");
        Ok(task.retry_count)
    }

    /// `Running -> Failed` (terminal).
    pub fn mark_failed(&mut self, id: TaskId, detail: impl Into<String>) -> Result<(), TransitionError> {
        let task = self.transition(id, TaskStatus::Failed)?;
        task.session = None;
        task.status_detail = detail.into();
        task.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Record that failed task `id` was resubmitted as `new_id`. The status
    /// does not change.
    pub fn link_resubmission(&mut self, id: TaskId, new_id: TaskId) -> Result<(), TransitionError> {
        let task = self.get_mut(id)?;
        if task.status != TaskStatus::Failed {
            return Err(TransitionError::Illegal {
                id,
                from: task.status,
                to: TaskStatus::Queued,
            });
        }
        task.resubmitted_as = Some(new_id);
        Ok(())
    }

    fn get_mut(&mut self, id: TaskId) -> Result<&mut Task, TransitionError> {
        let idx = *self.index.get(&id).ok_or(TransitionError::NotFound(id))?;
        Ok(&mut self.records[idx])
    }

    fn transition(&mut self, id: TaskId, to: TaskStatus) -> Result<&mut Task, TransitionError> {
        let task = self.get_mut(id)?;
        let from = task.status;
        if !is_legal(from, to) {
            warn!(task = %id, %from, %to, "refusing illegal task transition");
            return Err(TransitionError::Illegal { id, from, to });
        }
        task.status = to;
        Ok(task)
    }
}
