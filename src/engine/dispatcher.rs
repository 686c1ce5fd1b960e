// src/engine/dispatcher.rs

//! The dispatcher loop.
//!
//! One loop per engine, spawned by the first `start_execution`. Each pass
//! pairs as many queued tasks with available sessions as it can, spawning a
//! runner per pair, then waits for one of:
//! - a wake-up (task added, session released or added, engine started)
//! - a runner finishing
//! - the back-off timer (covers session cooldowns)
//! - cancellation
//!
//! On cancellation the loop stops assigning and waits for its runners.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::engine::{Shared, runner};
use crate::session::SessionId;
use crate::task::TaskId;

pub(crate) async fn run(shared: Arc<Shared>) {
    info!("dispatcher started");

    let mut runners: JoinSet<()> = JoinSet::new();
    let mut in_flight: HashMap<Id, (TaskId, SessionId)> = HashMap::new();
    let backoff = shared.options.dispatch_backoff;

    loop {
        while let Some(joined) = runners.try_join_next_with_id() {
            reap(&shared, &mut in_flight, joined);
        }

        loop {
            if skip_existing_head(&shared) {
                continue;
            }
            let assignment = shared.core().next_assignment(Instant::now());
            let Some(assignment) = assignment else {
                break;
            };
            let key = (assignment.task.id, assignment.lease.id);
            let handle = runners.spawn(runner::run(shared.clone(), assignment));
            in_flight.insert(handle.id(), key);
        }

        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = shared.wake.notified() => {}
            Some(joined) = runners.join_next_with_id(), if !runners.is_empty() => {
                reap(&shared, &mut in_flight, joined);
            }
            _ = tokio::time::sleep(backoff) => {
                debug!(in_flight = runners.len(), "dispatcher idle tick");
            }
        }
    }

    info!(in_flight = runners.len(), "dispatcher cancelled; waiting for running tasks");
    while let Some(joined) = runners.join_next_with_id().await {
        reap(&shared, &mut in_flight, joined);
    }
    info!("dispatcher stopped");
}

/// Complete the head of the queue without a session if it is a named task
/// whose artifact is already on disk. Returns `true` if it was skipped.
fn skip_existing_head(shared: &Shared) -> bool {
    let candidate = {
        let core = shared.core();
        core.next_candidate().and_then(|task| {
            let path = shared.artifacts.named_path(task)?;
            Some((task.id, shared.artifacts.resolve_dir(task), path))
        })
    };
    let Some((id, dir, path)) = candidate else {
        return false;
    };
    if !shared.fs.is_file(&path) {
        return false;
    }

    match shared.core().skip_existing(id, dir, path) {
        Ok(()) => true,
        Err(err) => {
            debug!(task = %id, error = %err, "head task changed before it could be skipped");
            false
        }
    }
}

/// Forget a finished runner. A runner that panicked never reported its
/// outcome, so release its session and fail the attempt here.
fn reap(
    shared: &Shared,
    in_flight: &mut HashMap<Id, (TaskId, SessionId)>,
    joined: Result<(Id, ()), JoinError>,
) {
    let id = match &joined {
        Ok((id, ())) => *id,
        Err(err) => err.id(),
    };
    let Some((task, session)) = in_flight.remove(&id) else {
        return;
    };

    if let Err(err) = joined {
        error!(task = %task, session = %session, error = %err, "task runner aborted");
        let reported = shared
            .core()
            .abort_attempt(task, session, format!("runner aborted: {err}"), Instant::now());
        if reported.is_none() {
            debug!(task = %task, "aborted runner had already reported its outcome");
        }
    }
}
