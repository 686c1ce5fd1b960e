// src/engine/status.rs

//! Read-only status views.
//!
//! A [`StatusSnapshot`] is built in one go while the engine lock is held, so
//! the session counts and task statuses in it always describe the same
//! instant. Consumers poll [`StatusReporter::snapshot`] as often as they like.

use std::sync::Arc;

use serde::Serialize;

use crate::engine::Shared;
use crate::session::SessionView;
use crate::task::{Task, TaskId, TaskStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.succeeded + self.failed
    }

    pub(crate) fn add(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Queued => self.queued += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Succeeded => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Sessions that are not retired.
    pub session_count: usize,
    pub busy_count: usize,
    pub retired_count: usize,
    pub is_running: bool,
    pub counts: TaskCounts,
    pub sessions: Vec<SessionView>,
    /// Every task ever admitted, in arrival order.
    pub tasks: Vec<Task>,
}

impl StatusSnapshot {
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// True when no task is queued or running.
    pub fn is_settled(&self) -> bool {
        self.counts.queued == 0 && self.counts.running == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "sessions {}/{} busy ({} retired), running={}, queued {}, running {}, succeeded {}, failed {}",
            self.busy_count,
            self.session_count,
            self.retired_count,
            self.is_running,
            self.counts.queued,
            self.counts.running,
            self.counts.succeeded,
            self.counts.failed,
        )
    }
}

/// Cheap, cloneable handle that produces status snapshots.
#[derive(Clone)]
pub struct StatusReporter {
    shared: Arc<Shared>,
}

impl StatusReporter {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.shared.core().snapshot()
    }
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter").finish_non_exhaustive()
    }
}
