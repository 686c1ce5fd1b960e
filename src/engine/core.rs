// src/engine/core.rs

//! Pure engine state.
//!
//! [`EngineCore`] owns the task store, the queue, the session pool and the
//! start/stop switch. It is synchronous and performs no IO, so every rule
//! about assignment, retries and session health can be unit tested without
//! Tokio.
//!
//! The async shell keeps one `EngineCore` behind a single mutex. Because a
//! session acquire and the matching `Queued -> Running` transition happen in
//! one call (and likewise release plus the terminal transition), no reader
//! ever sees a busy session without its running task or the reverse.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::engine::status::{StatusSnapshot, TaskCounts};
use crate::errors::{EngineError, Result};
use crate::session::{Session, SessionError, SessionHealth, SessionId, SessionLease, SessionPool};
use crate::task::{Task, TaskId, TaskSpec, TaskStatus, TaskStore, TransitionError};
use crate::engine::queue::TaskQueue;

/// A task paired with the session that will run it.
#[derive(Debug)]
pub struct Assignment {
    /// Copy of the record taken at assignment time.
    pub task: Task,
    pub lease: SessionLease,
}

/// How one attempt ended, as reported by a task runner.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded { saved_dir: PathBuf, saved_path: PathBuf },
    /// The session reported a failure (or a call timed out).
    Failed(SessionError),
    /// The artifact was fetched but could not be written.
    PersistFailed(String),
}

/// What the engine did with a finished attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Succeeded,
    Requeued { retry_count: u32 },
    Failed,
}

#[derive(Debug)]
pub struct EngineCore {
    store: TaskStore,
    queue: TaskQueue,
    pool: SessionPool,
    running: bool,
    max_retries: u32,
}

impl EngineCore {
    pub fn new(pool: SessionPool, max_retries: u32) -> Self {
        Self {
            store: TaskStore::new(),
            queue: TaskQueue::new(),
            pool,
            running: false,
            max_retries,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.store.get(id)
    }

    pub fn add_session(&mut self, session: Arc<dyn Session>) -> SessionId {
        self.pool.add(session)
    }

    /// Admit an already-validated spec as a new `Queued` task at the tail.
    pub fn enqueue(&mut self, spec: TaskSpec) -> TaskId {
        let id = self.store.insert(spec);
        self.queue.push(id);
        id
    }

    /// Flip the switch on.
    ///
    /// Returns `Ok(true)` if the engine was stopped before, `Ok(false)` if it
    /// was already running. Fails without changing state when every session
    /// has been retired (or none were added).
    pub fn start(&mut self) -> Result<bool> {
        if self.pool.session_count() == 0 {
            return Err(EngineError::NoUsableSessions);
        }
        if self.running {
            return Ok(false);
        }
        self.running = true;
        info!(queued = self.queue.len(), "execution started");
        Ok(true)
    }

    /// Flip the switch off. Running tasks are left alone.
    pub fn stop(&mut self) -> bool {
        let was_running = std::mem::replace(&mut self.running, false);
        if was_running {
            info!(
                queued = self.queue.len(),
                in_flight = self.pool.busy_count(),
                "execution stopped; draining running tasks"
            );
        }
        was_running
    }

    /// Pair the head of the queue with an available session.
    ///
    /// Returns `None` when stopped, when nothing is queued, or when no session
    /// is available at `now`. On success the session is busy, the task is
    /// `Running` and it is no longer queued.
    pub fn next_assignment(&mut self, now: Instant) -> Option<Assignment> {
        if !self.running {
            return None;
        }

        let id = self.queue.peek()?;
        let lease = self.pool.acquire(id, now)?;

        if let Err(err) = self.store.mark_running(id, lease.id, "submitting") {
            // Queue and store disagree; drop the stray id and hand the
            // session back untouched.
            warn!(task = %id, error = %err, "dropping queued task that cannot run");
            self.queue.remove(id);
            self.pool.release(lease.id, SessionHealth::Healthy, now);
            return None;
        }
        self.queue.remove(id);

        let task = self.store.get(id)?.clone();
        info!(
            task = %id,
            session = %lease.id,
            attempt = task.retry_count + 1,
            task_type = %task.spec.task_type,
            "task assigned"
        );
        Some(Assignment { task, lease })
    }

    /// Head of the queue while running, for checks made before assignment.
    pub fn next_candidate(&self) -> Option<&Task> {
        if !self.running {
            return None;
        }
        self.queue.peek().and_then(|id| self.store.get(id))
    }

    /// Complete a queued task without running it because its artifact is
    /// already on disk.
    pub fn skip_existing(
        &mut self,
        id: TaskId,
        saved_dir: PathBuf,
        saved_path: PathBuf,
    ) -> std::result::Result<(), TransitionError> {
        let detail = format!("{} already exists, skipped", saved_path.display());
        self.store.mark_skipped(id, saved_dir, saved_path, detail)?;
        self.queue.remove(id);
        info!(task = %id, "artifact already exists; task skipped");
        Ok(())
    }

    /// Record advisory progress for a running task. Late reports are dropped.
    pub fn report_progress(&mut self, id: TaskId, detail: impl Into<String>) {
        if let Err(err) = self.store.set_detail(id, detail) {
            debug!(task = %id, error = %err, "ignoring progress report");
        }
    }

    /// Apply the outcome of one attempt: release the session and move the
    /// task to its next state.
    pub fn complete(
        &mut self,
        id: TaskId,
        session: SessionId,
        outcome: AttemptOutcome,
        now: Instant,
    ) -> std::result::Result<Disposition, TransitionError> {
        match outcome {
            AttemptOutcome::Succeeded {
                saved_dir,
                saved_path,
            } => {
                self.pool.release(session, SessionHealth::Healthy, now);
                let detail = format!("saved to {}", saved_path.display());
                self.store.mark_succeeded(id, saved_dir, saved_path, detail)?;
                info!(task = %id, session = %session, "task succeeded");
                Ok(Disposition::Succeeded)
            }
            AttemptOutcome::PersistFailed(reason) => {
                self.pool.release(session, SessionHealth::Healthy, now);
                self.store
                    .mark_failed(id, format!("saving artifact failed: {reason}"))?;
                warn!(task = %id, session = %session, %reason, "task failed while saving artifact");
                Ok(Disposition::Failed)
            }
            AttemptOutcome::Failed(err) => {
                if self.pool.release(session, err.session_health(), now) {
                    self.halt_if_exhausted(session, &err);
                }

                let retries_so_far = self
                    .store
                    .get(id)
                    .map(|t| t.retry_count)
                    .ok_or(TransitionError::NotFound(id))?;

                if err.is_retryable() && retries_so_far < self.max_retries {
                    let retry_count = self
                        .store
                        .requeue_for_retry(id, format!("retrying after: {err}"))?;
                    self.queue.push(id);
                    warn!(
                        task = %id,
                        session = %session,
                        retry_count,
                        max_retries = self.max_retries,
                        error = %err,
                        "attempt failed; task requeued"
                    );
                    return Ok(Disposition::Requeued { retry_count });
                }

                let detail = if err.is_retryable() {
                    format!("{err} (gave up after {retries_so_far} retries)")
                } else {
                    err.to_string()
                };
                self.store.mark_failed(id, detail)?;
                warn!(task = %id, session = %session, error = %err, "task failed");
                Ok(Disposition::Failed)
            }
        }
    }

    /// Stop dispatching once the last usable session has been retired, so
    /// queued tasks are not left waiting on a pool that can never serve them.
    /// `add_session` followed by `start` resumes.
    fn halt_if_exhausted(&mut self, retired: SessionId, cause: &SessionError) {
        if self.pool.session_count() > 0 || !self.running {
            return;
        }
        self.running = false;
        error!(
            session = %retired,
            error = %cause,
            queued = self.queue.len(),
            "last usable session retired; execution stopped"
        );
    }

    /// Fail an attempt whose runner vanished without reporting.
    ///
    /// Only acts while `session` is still held by `id`; returns `None` if the
    /// attempt was already completed.
    pub fn abort_attempt(
        &mut self,
        id: TaskId,
        session: SessionId,
        reason: String,
        now: Instant,
    ) -> Option<Disposition> {
        if self.pool.holder_of(session) != Some(id) {
            return None;
        }
        let outcome = AttemptOutcome::Failed(SessionError::Transient(reason));
        self.complete(id, session, outcome, now).ok()
    }

    /// Create a new queued task from the parameters of a failed one.
    pub fn resubmit(&mut self, id: TaskId) -> Result<TaskId> {
        let task = self.store.get(id).ok_or(EngineError::TaskNotFound(id))?;
        if task.status != TaskStatus::Failed {
            return Err(EngineError::NotResubmittable {
                id,
                status: task.status,
            });
        }
        if let Some(new_id) = task.resubmitted_as {
            return Err(EngineError::AlreadyResubmitted { id, new_id });
        }
        let spec = task.spec.clone();
        let new_id = self.enqueue(spec);
        self.store
            .link_resubmission(id, new_id)
            .map_err(|e| EngineError::Other(e.into()))?;
        info!(task = %new_id, resubmitted_from = %id, "failed task resubmitted");
        Ok(new_id)
    }

    /// Failed tasks that have not been resubmitted yet.
    pub fn failed_ids(&self) -> Vec<TaskId> {
        self.store
            .iter()
            .filter(|t| t.status == TaskStatus::Failed && t.resubmitted_as.is_none())
            .map(|t| t.id)
            .collect()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let mut counts = TaskCounts::default();
        for task in self.store.iter() {
            counts.add(task.status);
        }

        StatusSnapshot {
            session_count: self.pool.session_count(),
            busy_count: self.pool.busy_count(),
            retired_count: self.pool.retired_count(),
            is_running: self.running,
            counts,
            sessions: self.pool.views(),
            tasks: self.store.iter().cloned().collect(),
        }
    }
}
