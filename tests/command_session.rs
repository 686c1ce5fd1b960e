// tests/command_session.rs
#![cfg(unix)]

mod common;
use crate::common::*;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use genqueue::engine::{Engine, EngineOptions};
use genqueue::fs::RealFileSystem;
use genqueue::session::{
    CommandSession, CommandSpec, JobRequest, JobState, Session, SessionError,
};
use genqueue::task::{Task, TaskId, TaskStatus};

fn shell(label: &str, script: &str, work_dir: &TempDir) -> CommandSession {
    let spec = CommandSpec {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
    };
    CommandSession::new(label, spec, work_dir.path())
}

fn request(prompt: &str) -> JobRequest {
    let task = Task::new(TaskId(7), TaskSpecBuilder::image(prompt).build());
    JobRequest::from_task(&task)
}

/// Poll until the job leaves `Processing`, collecting the details seen.
async fn poll_to_end(
    session: &CommandSession,
    job: &genqueue::session::JobHandle,
) -> (Result<JobState, SessionError>, Vec<String>) {
    let mut details = Vec::new();
    loop {
        match session.poll(job).await {
            Ok(status) if status.state == JobState::Processing => {
                details.extend(status.detail);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(status) => return (Ok(status.state), details),
            Err(err) => return (Err(err), details),
        }
    }
}

#[tokio::test]
async fn bridge_output_is_fetched_and_cleaned_up() {
    init_tracing();
    let work = TempDir::new().unwrap();
    let session = shell(
        "bridge",
        r#"echo "progress: rendering"; sleep 0.2; printf '%s|%s|%s' "$GENQUEUE_PROMPT" "$GENQUEUE_RESOLUTION" "$GENQUEUE_ASPECT_RATIO" > "$GENQUEUE_OUTPUT""#,
        &work,
    );

    let job = with_timeout(session.submit(&request("  a quiet harbour  "))).await.unwrap();
    let (state, details) = with_timeout(poll_to_end(&session, &job)).await;
    assert_eq!(state, Ok(JobState::Completed));
    assert!(details.iter().any(|d| d == "rendering"), "{details:?}");

    let artifact = session.fetch(&job).await.unwrap();
    assert_eq!(artifact.bytes, b"a quiet harbour|1K|16:9");
    assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);

    assert!(session.fetch(&job).await.is_err());
}

#[tokio::test]
async fn reported_error_kind_classifies_the_failure() {
    init_tracing();
    let work = TempDir::new().unwrap();

    let cases = [
        ("quota", SessionError::QuotaExceeded("no credits left".into())),
        ("auth", SessionError::AuthExpired("no credits left".into())),
        ("rate_limit", SessionError::RateLimited("no credits left".into())),
    ];
    for (kind, expected) in cases {
        let session = shell(
            kind,
            &format!("echo 'error: {kind}: no credits left'; exit 3"),
            &work,
        );
        let job = session.submit(&request("x")).await.unwrap();
        let (state, _) = with_timeout(poll_to_end(&session, &job)).await;
        assert_eq!(state, Err(expected));
    }
}

#[tokio::test]
async fn silent_failures_are_transient() {
    init_tracing();
    let work = TempDir::new().unwrap();

    let crashed = shell("crashed", "exit 9", &work);
    let job = crashed.submit(&request("x")).await.unwrap();
    let (state, _) = with_timeout(poll_to_end(&crashed, &job)).await;
    assert!(matches!(state, Err(SessionError::Transient(msg)) if msg.contains("code 9")));

    let lazy = shell("lazy", "exit 0", &work);
    let job = lazy.submit(&request("x")).await.unwrap();
    let (state, _) = with_timeout(poll_to_end(&lazy, &job)).await;
    assert!(matches!(state, Err(SessionError::Transient(msg)) if msg.contains("without writing")));
}

#[tokio::test]
async fn missing_program_fails_submission() {
    let work = TempDir::new().unwrap();
    let session = CommandSession::new(
        "ghost",
        CommandSpec {
            program: "/definitely/not/a/bridge".to_string(),
            args: Vec::new(),
        },
        work.path(),
    );

    let err = session.submit(&request("x")).await.unwrap_err();
    assert!(matches!(err, SessionError::Transient(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn abandoned_job_is_forgotten() {
    let work = TempDir::new().unwrap();
    let session = shell("sleepy", "sleep 30", &work);

    let job = session.submit(&request("x")).await.unwrap();
    let status = session.poll(&job).await.unwrap();
    assert_eq!(status.state, JobState::Processing);

    session.abandon(&job);
    assert!(matches!(session.poll(&job).await, Err(SessionError::Transient(_))));
}

#[tokio::test]
async fn abandoning_a_finished_job_removes_its_output() {
    init_tracing();
    let work = TempDir::new().unwrap();
    let session = shell("finisher", r#"printf 'done' > "$GENQUEUE_OUTPUT""#, &work);

    let job = session.submit(&request("x")).await.unwrap();
    let (state, _) = with_timeout(poll_to_end(&session, &job)).await;
    assert_eq!(state, Ok(JobState::Completed));
    assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 1);

    session.abandon(&job);
    assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    assert!(session.fetch(&job).await.is_err());
}

#[tokio::test]
async fn engine_drives_command_sessions_end_to_end() {
    init_tracing();
    let work = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    let script = r#"echo "progress: working"; printf 'video:%s' "$GENQUEUE_TASK_TYPE" > "$GENQUEUE_OUTPUT""#;
    let sessions: Vec<Arc<dyn Session>> = (0..2)
        .map(|i| Arc::new(shell(&format!("cmd{i}"), script, &work)) as Arc<dyn Session>)
        .collect();
    let options = EngineOptions {
        output_dir: out.path().to_path_buf(),
        poll_interval: Duration::from_millis(20),
        ..fast_options()
    };
    let engine = Engine::new(options, Arc::new(RealFileSystem), sessions);

    let ids: Vec<_> = (0..3)
        .map(|i| {
            engine
                .enqueue(TaskSpecBuilder::video("clip").name(&format!("clip-{i}")).build())
                .unwrap()
        })
        .collect();
    engine.start_execution().unwrap();
    wait_until("all clips saved", || engine.get_status().is_settled()).await;
    engine.shutdown().await;

    let snap = engine.get_status();
    for (i, id) in ids.into_iter().enumerate() {
        assert_eq!(status_of(&snap, id), TaskStatus::Succeeded);
        let path = out.path().join(format!("clip-{i}.mp4"));
        assert_eq!(std::fs::read(&path).unwrap(), b"video:text-to-video");
    }
}
