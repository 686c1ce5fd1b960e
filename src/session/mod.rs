// src/session/mod.rs

//! Sessions: authenticated handles to the external generation service.
//!
//! The engine treats a session as an opaque capability with three calls:
//! `submit` a job, `poll` it, and `fetch` the finished artifact. How a
//! session talks to the service is its own business.
//!
//! - [`pool`] tracks idle/busy/retired sessions and hands them out.
//! - [`command`] provides [`CommandSession`], which drives the service
//!   through an external bridge program.
//!
//! Tests provide their own `Session` implementations that script outcomes
//! without any IO.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{AspectRatio, Resolution, Task, TaskId, TaskType};

pub mod command;
pub mod pool;

pub use command::{CommandSession, CommandSpec};
pub use pool::{SessionHealth, SessionLease, SessionPool, SessionView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Failure reported by a session call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient service error: {0}")]
    Transient(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rejected by service: {0}")]
    Rejected(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl SessionError {
    /// Whether the task may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::RateLimited(_) | SessionError::Transient(_) | SessionError::Timeout(_)
        )
    }

    /// What this failure says about the session that produced it.
    pub fn session_health(&self) -> SessionHealth {
        match self {
            SessionError::AuthExpired(_) => SessionHealth::Broken,
            SessionError::RateLimited(_) | SessionError::Transient(_) | SessionError::Timeout(_) => {
                SessionHealth::Degraded
            }
            SessionError::Rejected(_) | SessionError::QuotaExceeded(_) => SessionHealth::Healthy,
        }
    }
}

/// Parameters sent to the service for one attempt of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRequest {
    pub task_id: TaskId,
    pub prompt: String,
    pub task_type: TaskType,
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
    pub reference_images: Vec<PathBuf>,
}

impl JobRequest {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            prompt: task.spec.prompt.trim().to_string(),
            task_type: task.spec.task_type,
            aspect_ratio: task.spec.aspect_ratio,
            resolution: task.spec.resolution,
            reference_images: task.spec.reference_images.clone(),
        }
    }
}

/// Service-side identifier of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Processing,
    Completed,
}

/// Result of one `poll` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    /// Coarse progress text reported by the service, if any.
    pub detail: Option<String>,
}

impl JobStatus {
    pub fn processing(detail: impl Into<String>) -> Self {
        Self {
            state: JobState::Processing,
            detail: Some(detail.into()),
        }
    }

    pub fn completed() -> Self {
        Self {
            state: JobState::Completed,
            detail: None,
        }
    }
}

/// Bytes of a finished artifact.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("len", &self.bytes.len())
            .finish()
    }
}

pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SessionError>> + Send + 'a>>;

/// Capability exposed by one authenticated service handle.
///
/// A session is only ever driven by one task runner at a time; the pool
/// guarantees that. Implementations still take `&self` so they can be shared
/// behind an `Arc`.
pub trait Session: Send + Sync + fmt::Debug {
    fn submit<'a>(&'a self, request: &'a JobRequest) -> SessionFuture<'a, JobHandle>;

    fn poll<'a>(&'a self, job: &'a JobHandle) -> SessionFuture<'a, JobStatus>;

    fn fetch<'a>(&'a self, job: &'a JobHandle) -> SessionFuture<'a, Artifact>;

    /// Called when the runner gives up on a submitted job (timeout or
    /// failure) so the session can drop whatever it holds for it.
    fn abandon(&self, _job: &JobHandle) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_classification() {
        let cases = [
            (SessionError::AuthExpired("x".into()), false, SessionHealth::Broken),
            (SessionError::RateLimited("x".into()), true, SessionHealth::Degraded),
            (SessionError::Transient("x".into()), true, SessionHealth::Degraded),
            (SessionError::Timeout(Duration::from_secs(1)), true, SessionHealth::Degraded),
            (SessionError::Rejected("x".into()), false, SessionHealth::Healthy),
            (SessionError::QuotaExceeded("x".into()), false, SessionHealth::Healthy),
        ];

        for (err, retryable, health) in cases {
            assert_eq!(err.is_retryable(), retryable, "{err}");
            assert_eq!(err.session_health(), health, "{err}");
        }
    }
}
