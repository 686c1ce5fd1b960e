// src/engine/runner.rs

//! Task runner: drives one attempt of one task on one session.
//!
//! submit -> poll until completed -> fetch -> persist -> report.
//!
//! Every session call is bounded by `request_timeout` and the whole attempt
//! by `task_timeout`; either expiring counts as a retryable
//! [`SessionError::Timeout`]. The runner always reports exactly one outcome
//! back to the core, which releases the session in the same step.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::artifact::SavedArtifact;
use crate::engine::Shared;
use crate::engine::core::{Assignment, AttemptOutcome};
use crate::session::{
    Artifact, JobHandle, JobRequest, JobState, SessionError, SessionFuture, SessionLease,
};
use crate::task::{Task, TaskId};

pub(crate) async fn run(shared: Arc<Shared>, assignment: Assignment) {
    let Assignment { task, lease } = assignment;
    let id = task.id;
    let attempt = task.retry_count + 1;
    let started = Instant::now();
    info!(task = %id, session = %lease.id, attempt, "runner started");

    let request = JobRequest::from_task(&task);
    let task_timeout = shared.options.task_timeout;
    let mut submitted: Option<JobHandle> = None;

    let fetched = match timeout(task_timeout, drive(&shared, &lease, &request, &mut submitted)).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout(task_timeout)),
    };

    let outcome = match fetched {
        Ok(artifact) => {
            shared.core().report_progress(id, "saving");
            persist(&shared, task, artifact).await
        }
        Err(err) => {
            if let Some(job) = &submitted {
                lease.session.abandon(job);
            }
            AttemptOutcome::Failed(err)
        }
    };

    let result = shared
        .core()
        .complete(id, lease.id, outcome, Instant::now());
    match result {
        Ok(disposition) => debug!(
            task = %id,
            attempt,
            ?disposition,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "runner finished"
        ),
        Err(err) => error!(task = %id, error = %err, "runner outcome rejected"),
    }
    shared.wake.notify_one();
}

async fn drive(
    shared: &Shared,
    lease: &SessionLease,
    request: &JobRequest,
    submitted: &mut Option<JobHandle>,
) -> Result<Artifact, SessionError> {
    let limit = shared.options.request_timeout;
    let id = request.task_id;

    let job = call(limit, lease.session.submit(request)).await?;
    debug!(task = %id, job = %job, "job submitted");
    *submitted = Some(job.clone());
    shared.core().report_progress(id, "submitted");

    loop {
        let status = call(limit, lease.session.poll(&job)).await?;
        match status.state {
            JobState::Completed => break,
            JobState::Processing => {
                if let Some(detail) = status.detail {
                    debug!(task = %id, job = %job, %detail, "job progress");
                    shared.core().report_progress(id, detail);
                }
            }
        }
        tokio::time::sleep(shared.options.poll_interval).await;
    }

    shared.core().report_progress(id, "downloading");
    call(limit, lease.session.fetch(&job)).await
}

async fn call<T>(limit: Duration, fut: SessionFuture<'_, T>) -> Result<T, SessionError> {
    timeout(limit, fut)
        .await
        .unwrap_or(Err(SessionError::Timeout(limit)))
}

async fn persist(shared: &Shared, task: Task, artifact: Artifact) -> AttemptOutcome {
    let writer = shared.artifacts.clone();
    let id: TaskId = task.id;

    let saved = tokio::task::spawn_blocking(move || writer.save(&task, &artifact.bytes)).await;
    match saved {
        Ok(Ok(SavedArtifact { dir, path })) => {
            info!(task = %id, path = %path.display(), "artifact saved");
            AttemptOutcome::Succeeded {
                saved_dir: dir,
                saved_path: path,
            }
        }
        Ok(Err(err)) => {
            error!(task = %id, error = %err, "failed to save artifact");
            AttemptOutcome::PersistFailed(format!("{err:#}"))
        }
        Err(err) => {
            error!(task = %id, error = %err, "artifact writer task failed");
            AttemptOutcome::PersistFailed(err.to_string())
        }
    }
}
