#![allow(dead_code)]

use std::sync::Arc;

use genqueue::engine::{Engine, EngineOptions, StatusSnapshot};
use genqueue::fs::MockFileSystem;
use genqueue::session::Session;
use genqueue::task::{TaskId, TaskStatus};

pub use genqueue_test_utils::builders::{TaskSpecBuilder, add_request, fast_options};
pub use genqueue_test_utils::fake_session::{Gate, Probe, Scripted, ScriptedSession, scripted_sessions};
pub use genqueue_test_utils::{init_tracing, wait_until, with_timeout};

/// Engine over a mock filesystem.
pub fn mock_engine(options: EngineOptions, sessions: Vec<Arc<dyn Session>>) -> (Engine, Arc<MockFileSystem>) {
    let fs = Arc::new(MockFileSystem::new());
    let engine = Engine::new(options, fs.clone(), sessions);
    (engine, fs)
}

pub fn status_of(snapshot: &StatusSnapshot, id: TaskId) -> TaskStatus {
    snapshot
        .task(id)
        .map(|t| t.status)
        .unwrap_or_else(|| panic!("{id} missing from snapshot"))
}

/// The invariants every snapshot must satisfy.
pub fn assert_snapshot_consistent(snapshot: &StatusSnapshot) {
    assert_eq!(
        snapshot.busy_count, snapshot.counts.running,
        "busy sessions must match running tasks: {}",
        snapshot.summary()
    );
    assert!(
        snapshot.busy_count <= snapshot.session_count + snapshot.retired_count,
        "more busy sessions than exist: {}",
        snapshot.summary()
    );
    assert_eq!(snapshot.counts.total(), snapshot.tasks.len());

    let bound: Vec<_> = snapshot.tasks.iter().filter_map(|t| t.session).collect();
    let mut unique = bound.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(bound.len(), unique.len(), "a session is bound to two tasks");
}
