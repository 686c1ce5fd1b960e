// src/engine/mod.rs

//! Task execution engine.
//!
//! This module ties together:
//! - the task store and queue
//! - the session pool
//! - the dispatcher loop that pairs idle sessions with queued tasks
//! - one task runner per assignment
//! - status snapshots for pollers
//!
//! The pure state machine lives in [`core`]; the async shell is the
//! [`dispatcher`] and [`runner`]. [`Engine`] is the handle callers use.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifact::ArtifactWriter;
use crate::errors::{EngineError, Result};
use crate::fs::FileSystem;
use crate::session::{Session, SessionId, SessionPool};
use crate::task::{
    AspectRatio, Resolution, TaskId, TaskSpec, TaskType, ValidationError, validate_spec,
};

pub mod core;
pub mod dispatcher;
pub mod queue;
pub mod runner;
pub mod status;

pub use core::{AttemptOutcome, Disposition, EngineCore};
pub use queue::TaskQueue;
pub use status::{StatusReporter, StatusSnapshot, TaskCounts};

/// Tunables shared by the core and the async shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Retries allowed after a retryable failure; a task gets at most
    /// `max_retries + 1` attempts.
    pub max_retries: u32,
    /// Consecutive degraded releases before a session is retired.
    pub session_failure_threshold: u32,
    pub session_cooldown: Duration,
    pub poll_interval: Duration,
    /// Bound on one submit/poll/fetch call.
    pub request_timeout: Duration,
    /// Bound on one whole attempt.
    pub task_timeout: Duration,
    /// How long the dispatcher sleeps when nothing can be paired.
    pub dispatch_backoff: Duration,
    /// Base for relative task output directories.
    pub output_dir: PathBuf,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            session_failure_threshold: 3,
            session_cooldown: Duration::from_secs(3),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(60),
            task_timeout: Duration::from_secs(10 * 60),
            dispatch_backoff: Duration::from_millis(500),
            output_dir: PathBuf::from("output"),
        }
    }
}

/// Loosely typed task submission, as it arrives from a caller.
///
/// Enum fields are plain strings and are parsed case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTaskRequest {
    #[serde(default)]
    pub prompt: String,
    pub task_type: String,
    pub aspect_ratio: String,
    pub resolution: String,
    #[serde(default)]
    pub reference_images: Vec<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub name: Option<String>,
}

impl AddTaskRequest {
    pub fn to_spec(&self) -> std::result::Result<TaskSpec, ValidationError> {
        Ok(TaskSpec {
            prompt: self.prompt.clone(),
            task_type: self.task_type.parse::<TaskType>()?,
            aspect_ratio: self.aspect_ratio.parse::<AspectRatio>()?,
            resolution: self.resolution.parse::<Resolution>()?,
            reference_images: self.reference_images.clone(),
            output_dir: self.output_dir.clone(),
            name: self.name.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddTaskResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State shared by the engine handle, the dispatcher and every runner.
pub(crate) struct Shared {
    core: Mutex<EngineCore>,
    /// Poked whenever a session or task may have become available.
    wake: Notify,
    cancel: CancellationToken,
    options: EngineOptions,
    fs: Arc<dyn FileSystem>,
    artifacts: ArtifactWriter,
}

impl Shared {
    pub(crate) fn core(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running engine.
///
/// Construct it explicitly and pass it to whoever needs it; there is no
/// process-wide instance. Dropping the handle cancels the dispatcher; use
/// [`Engine::shutdown`] to also wait for running tasks.
pub struct Engine {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        options: EngineOptions,
        fs: Arc<dyn FileSystem>,
        sessions: impl IntoIterator<Item = Arc<dyn Session>>,
    ) -> Self {
        let mut pool = SessionPool::new(options.session_failure_threshold, options.session_cooldown);
        for session in sessions {
            pool.add(session);
        }

        let artifacts = ArtifactWriter::new(fs.clone(), options.output_dir.clone());
        let shared = Arc::new(Shared {
            core: Mutex::new(EngineCore::new(pool, options.max_retries)),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            options,
            fs,
            artifacts,
        });

        Self {
            shared,
            dispatcher: Mutex::new(None),
        }
    }

    /// Add a session to the pool, e.g. to replace a retired one.
    pub fn add_session(&self, session: Arc<dyn Session>) -> SessionId {
        let id = self.shared.core().add_session(session);
        self.shared.wake.notify_one();
        id
    }

    /// Validate and enqueue a loosely typed request.
    ///
    /// Never panics or errors; failures are reported in the response and
    /// leave the queue untouched.
    pub fn add_task(&self, request: AddTaskRequest) -> AddTaskResponse {
        let result = request
            .to_spec()
            .map_err(EngineError::from)
            .and_then(|spec| self.enqueue(spec));

        match result {
            Ok(id) => AddTaskResponse {
                success: true,
                task_id: Some(id),
                error: None,
            },
            Err(err) => {
                info!(error = %err, "task rejected");
                AddTaskResponse {
                    success: false,
                    task_id: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Validate and enqueue a typed spec.
    pub fn enqueue(&self, spec: TaskSpec) -> Result<TaskId> {
        validate_spec(&spec, self.shared.fs.as_ref())?;

        let id = {
            let mut core = self.shared.core();
            let id = core.enqueue(spec);
            if let Some(task) = core.task(id) {
                info!(
                    task = %id,
                    task_type = %task.spec.task_type,
                    resolution = %task.spec.resolution,
                    queued = core.queue_len(),
                    "task admitted"
                );
            }
            id
        };
        self.shared.wake.notify_one();
        Ok(id)
    }

    pub fn get_status(&self) -> StatusSnapshot {
        self.shared.core().snapshot()
    }

    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new(self.shared.clone())
    }

    pub fn is_running(&self) -> bool {
        self.shared.core().is_running()
    }

    /// Enable dispatching.
    ///
    /// Must be called from within a Tokio runtime. Calling it while already
    /// running is a no-op; the dispatcher loop is only ever spawned once.
    pub fn start_execution(&self) -> Result<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(EngineError::ShutDown);
        }
        let handle = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let newly_started = self.shared.core().start()?;

        let mut dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if dispatcher.is_none() {
            *dispatcher = Some(handle.spawn(dispatcher::run(self.shared.clone())));
        } else if !newly_started {
            debug!("start_execution called while already running");
        }
        drop(dispatcher);

        self.shared.wake.notify_one();
        Ok(())
    }

    /// Stop making new assignments. Running tasks finish on their own.
    pub fn stop_execution(&self) {
        self.shared.core().stop();
    }

    /// Enqueue a fresh copy of a failed task.
    pub fn resubmit(&self, id: TaskId) -> Result<TaskId> {
        let new_id = self.shared.core().resubmit(id)?;
        self.shared.wake.notify_one();
        Ok(new_id)
    }

    /// Resubmit every failed task that has not been resubmitted yet.
    /// Returns the new ids.
    pub fn resubmit_failed(&self) -> Vec<TaskId> {
        let ids = {
            let mut core = self.shared.core();
            let failed = core.failed_ids();
            failed
                .into_iter()
                .filter_map(|id| match core.resubmit(id) {
                    Ok(new_id) => Some(new_id),
                    Err(err) => {
                        warn!(task = %id, error = %err, "could not resubmit task");
                        None
                    }
                })
                .collect::<Vec<_>>()
        };
        if !ids.is_empty() {
            self.shared.wake.notify_one();
        }
        ids
    }

    /// Stop dispatching, cancel the dispatcher and wait for running tasks.
    ///
    /// Queued tasks stay queued. The engine cannot be started again.
    pub async fn shutdown(&self) {
        self.shared.core().stop();
        self.shared.cancel.cancel();

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "dispatcher task ended abnormally");
            }
        }
        info!("engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}
