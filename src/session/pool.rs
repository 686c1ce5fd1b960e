// src/session/pool.rs

//! Fixed pool of sessions with idle/busy/retired bookkeeping.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::session::{Session, SessionId};
use crate::task::TaskId;

/// What a runner reports about a session when handing it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    /// The session worked (even if the service refused the request).
    Healthy,
    /// A transient failure; counts toward retirement.
    Degraded,
    /// The session cannot be used again (e.g. expired credentials).
    Broken,
}

/// A session checked out of the pool.
#[derive(Clone)]
pub struct SessionLease {
    pub id: SessionId,
    pub session: Arc<dyn Session>,
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Read-only view of one session for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub id: SessionId,
    pub busy: bool,
    pub task: Option<TaskId>,
    pub failure_count: u32,
    pub retired: bool,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct SessionSlot {
    id: SessionId,
    session: Arc<dyn Session>,
    /// Task currently holding the session. `Some` means busy.
    holder: Option<TaskId>,
    /// Consecutive degraded releases.
    failure_count: u32,
    retired: bool,
    released_at: Option<Instant>,
    last_used: Option<DateTime<Utc>>,
}

impl SessionSlot {
    fn is_available(&self, now: Instant, cooldown: Duration) -> bool {
        if self.retired || self.holder.is_some() {
            return false;
        }
        match self.released_at {
            Some(at) => now.saturating_duration_since(at) >= cooldown,
            None => true,
        }
    }
}

/// Owns every session record.
///
/// `acquire` and `release` are the only operations that change busy state,
/// so the busy count always equals the number of sessions held by a runner.
/// The pool itself is not synchronised; the engine keeps it behind the same
/// lock as the task store.
#[derive(Debug)]
pub struct SessionPool {
    slots: Vec<SessionSlot>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl SessionPool {
    /// `failure_threshold` is clamped to at least 1.
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            slots: Vec::new(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// Add a session and return its id. Ids are never reused.
    pub fn add(&mut self, session: Arc<dyn Session>) -> SessionId {
        let id = SessionId(self.slots.len() as u32);
        self.slots.push(SessionSlot {
            id,
            session,
            holder: None,
            failure_count: 0,
            retired: false,
            released_at: None,
            last_used: None,
        });
        info!(session = %id, "session added to pool");
        id
    }

    /// Sessions that are not retired.
    pub fn session_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.retired).count()
    }

    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.holder.is_some()).count()
    }

    pub fn retired_count(&self) -> usize {
        self.slots.iter().filter(|s| s.retired).count()
    }

    /// Check out the first available session for `holder`. Never blocks.
    pub fn acquire(&mut self, holder: TaskId, now: Instant) -> Option<SessionLease> {
        let cooldown = self.cooldown;
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.is_available(now, cooldown))?;

        slot.holder = Some(holder);
        slot.last_used = Some(Utc::now());
        debug!(session = %slot.id, task = %holder, "session acquired");

        Some(SessionLease {
            id: slot.id,
            session: Arc::clone(&slot.session),
        })
    }

    /// Return a session to the pool.
    ///
    /// Returns `true` if this release retired the session. Releasing a
    /// session that is not checked out is ignored.
    pub fn release(&mut self, id: SessionId, health: SessionHealth, now: Instant) -> bool {
        let threshold = self.failure_threshold;
        let Some(slot) = self.slots.iter_mut().find(|s| s.id == id) else {
            warn!(session = %id, "release for unknown session; ignoring");
            return false;
        };

        let Some(holder) = slot.holder.take() else {
            warn!(session = %id, "release for a session that is not checked out; ignoring");
            return false;
        };
        slot.released_at = Some(now);

        match health {
            SessionHealth::Healthy => {
                slot.failure_count = 0;
            }
            SessionHealth::Degraded => {
                slot.failure_count += 1;
                if slot.failure_count >= threshold {
                    slot.retired = true;
                }
            }
            SessionHealth::Broken => {
                slot.failure_count += 1;
                slot.retired = true;
            }
        }

        if slot.retired {
            warn!(
                session = %id,
                task = %holder,
                failure_count = slot.failure_count,
                "session retired from pool"
            );
        } else {
            debug!(session = %id, task = %holder, ?health, "session released");
        }
        slot.retired
    }

    /// Task holding `id`, if it is checked out.
    pub fn holder_of(&self, id: SessionId) -> Option<TaskId> {
        self.slots.iter().find(|s| s.id == id).and_then(|s| s.holder)
    }

    pub fn views(&self) -> Vec<SessionView> {
        self.slots
            .iter()
            .map(|s| SessionView {
                id: s.id,
                busy: s.holder.is_some(),
                task: s.holder,
                failure_count: s.failure_count,
                retired: s.retired,
                last_used: s.last_used,
            })
            .collect()
    }
}
