// src/session/command.rs

//! Session backed by an external bridge program.
//!
//! Each submitted job spawns the configured program once. The job parameters
//! are passed through `GENQUEUE_*` environment variables and the program is
//! expected to write the finished artifact to `GENQUEUE_OUTPUT`.
//!
//! Stdout is scanned line by line:
//! - `progress: <text>` updates the job detail reported by `poll`.
//! - `error: <kind>: <message>` classifies a failure, where `kind` is one of
//!   `auth`, `rate_limit`, `transient`, `rejected` or `quota`.
//!
//! Exit status 0 with the output file present means the job completed. A
//! non-zero exit reports the last classified error, or `Transient` if the
//! program never printed one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::{
    Artifact, JobHandle, JobRequest, JobStatus, Session, SessionError, SessionFuture,
};

static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*progress:\s*(.*?)\s*$").expect("progress pattern is valid")
});

static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*error:\s*([A-Za-z_]+)\s*:\s*(.*?)\s*$").expect("error pattern is valid")
});

/// How long `poll` waits for the stdout monitor to drain after the program
/// exited.
const MONITOR_DRAIN: Duration = Duration::from_secs(1);

/// Program and arguments used to drive the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Default)]
struct MonitorState {
    progress: Option<String>,
    error: Option<SessionError>,
}

#[derive(Debug)]
enum JobEntry {
    Running {
        child: Child,
        output: PathBuf,
        monitor: Arc<Mutex<MonitorState>>,
        monitor_task: JoinHandle<()>,
    },
    Finished {
        output: PathBuf,
    },
}

#[derive(Debug)]
pub struct CommandSession {
    label: String,
    spec: CommandSpec,
    work_dir: PathBuf,
    next_job: AtomicU64,
    jobs: Mutex<HashMap<JobHandle, JobEntry>>,
}

impl CommandSession {
    /// `work_dir` holds artifacts between the program exiting and `fetch`.
    pub fn new(label: impl Into<String>, spec: CommandSpec, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            spec,
            work_dir: work_dir.into(),
            next_job: AtomicU64::new(0),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobHandle, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn spawn_job(&self, request: &JobRequest) -> Result<JobHandle, SessionError> {
        let n = self.next_job.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = JobHandle(format!("{}-job-{}", self.label, n));
        let output = self.work_dir.join(format!(
            "{}.{}",
            handle.0,
            request.task_type.artifact_extension()
        ));

        tokio::fs::create_dir_all(&self.work_dir).await.map_err(|e| {
            SessionError::Transient(format!("creating work dir {:?}: {e}", self.work_dir))
        })?;

        let references = serde_json::to_string(&request.reference_images)
            .map_err(|e| SessionError::Rejected(format!("encoding reference images: {e}")))?;

        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .env("GENQUEUE_SESSION", &self.label)
            .env("GENQUEUE_PROMPT", &request.prompt)
            .env("GENQUEUE_TASK_TYPE", request.task_type.as_str())
            .env("GENQUEUE_ASPECT_RATIO", request.aspect_ratio.as_str())
            .env("GENQUEUE_RESOLUTION", request.resolution.as_str())
            .env("GENQUEUE_REFERENCE_IMAGES", references)
            .env("GENQUEUE_OUTPUT", &output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            SessionError::Transient(format!("spawning '{}': {e}", self.spec.program))
        })?;

        info!(
            session = %self.label,
            job = %handle,
            task = %request.task_id,
            program = %self.spec.program,
            "bridge process started"
        );

        let monitor = Arc::new(Mutex::new(MonitorState::default()));
        let monitor_task = spawn_stdout_monitor(handle.clone(), child.stdout.take(), monitor.clone());

        if let Some(stderr) = child.stderr.take() {
            let job = handle.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(job = %job, "stderr: {}", line);
                }
            });
        }

        self.jobs().insert(
            handle.clone(),
            JobEntry::Running {
                child,
                output,
                monitor,
                monitor_task,
            },
        );
        Ok(handle)
    }

    async fn poll_job(&self, job: &JobHandle) -> Result<JobStatus, SessionError> {
        let exited = {
            let mut jobs = self.jobs();
            let Some(entry) = jobs.get_mut(job) else {
                return Err(SessionError::Transient(format!("unknown job {job}")));
            };

            match entry {
                JobEntry::Finished { .. } => return Ok(JobStatus::completed()),
                JobEntry::Running { child, monitor, .. } => match child.try_wait() {
                    Ok(None) => {
                        let detail = lock(monitor)
                            .progress
                            .clone()
                            .unwrap_or_else(|| "processing".to_string());
                        return Ok(JobStatus::processing(detail));
                    }
                    Ok(Some(status)) => status,
                    Err(e) => {
                        jobs.remove(job);
                        return Err(SessionError::Transient(format!(
                            "waiting for bridge process: {e}"
                        )));
                    }
                },
            }
        };

        let Some(JobEntry::Running {
            output,
            monitor,
            monitor_task,
            ..
        }) = self.jobs().remove(job)
        else {
            return Err(SessionError::Transient(format!("job {job} vanished")));
        };

        // Let the monitor read whatever the program printed before exiting.
        if tokio::time::timeout(MONITOR_DRAIN, monitor_task).await.is_err() {
            debug!(job = %job, "stdout monitor still running after exit");
        }
        let reported = lock(&monitor).error.clone();

        info!(
            session = %self.label,
            job = %job,
            exit_code = exited.code().unwrap_or(-1),
            success = exited.success(),
            "bridge process exited"
        );

        if !exited.success() {
            return Err(reported.unwrap_or_else(|| {
                SessionError::Transient(format!(
                    "bridge exited with code {}",
                    exited.code().unwrap_or(-1)
                ))
            }));
        }

        if let Some(err) = reported {
            warn!(job = %job, error = %err, "bridge reported an error but exited cleanly");
        }

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(SessionError::Transient(format!(
                "bridge exited without writing {:?}",
                output
            )));
        }

        self.jobs().insert(job.clone(), JobEntry::Finished { output });
        Ok(JobStatus::completed())
    }

    async fn fetch_job(&self, job: &JobHandle) -> Result<Artifact, SessionError> {
        let entry = self.jobs().remove(job);
        let output = match entry {
            Some(JobEntry::Finished { output }) => output,
            Some(running @ JobEntry::Running { .. }) => {
                self.jobs().insert(job.clone(), running);
                return Err(SessionError::Transient(format!("job {job} has not finished")));
            }
            None => return Err(SessionError::Transient(format!("unknown job {job}"))),
        };

        let bytes = tokio::fs::read(&output)
            .await
            .map_err(|e| SessionError::Transient(format!("reading {:?}: {e}", output)))?;

        if let Err(e) = tokio::fs::remove_file(&output).await {
            debug!(path = ?output, error = %e, "failed to remove fetched artifact");
        }
        Ok(Artifact { bytes })
    }
}

impl Session for CommandSession {
    fn submit<'a>(&'a self, request: &'a JobRequest) -> SessionFuture<'a, JobHandle> {
        Box::pin(self.spawn_job(request))
    }

    fn poll<'a>(&'a self, job: &'a JobHandle) -> SessionFuture<'a, JobStatus> {
        Box::pin(self.poll_job(job))
    }

    fn fetch<'a>(&'a self, job: &'a JobHandle) -> SessionFuture<'a, Artifact> {
        Box::pin(self.fetch_job(job))
    }

    fn abandon(&self, job: &JobHandle) {
        let Some(entry) = self.jobs().remove(job) else {
            return;
        };
        let output = match entry {
            JobEntry::Running { child, output, .. } => {
                // Dropping the child kills it.
                drop(child);
                output
            }
            JobEntry::Finished { output } => output,
        };
        match std::fs::remove_file(&output) {
            Ok(()) => debug!(path = ?output, "removed output of abandoned job"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = ?output, error = %e, "failed to remove abandoned output"),
        }
        info!(session = %self.label, job = %job, "abandoned bridge job");
    }
}

fn lock(state: &Mutex<MonitorState>) -> MutexGuard<'_, MonitorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Map an `error: <kind>: <message>` line to a session error.
fn classify(kind: &str, message: &str) -> SessionError {
    let message = message.to_string();
    match kind.to_ascii_lowercase().as_str() {
        "auth" => SessionError::AuthExpired(message),
        "rate_limit" => SessionError::RateLimited(message),
        "rejected" => SessionError::Rejected(message),
        "quota" => SessionError::QuotaExceeded(message),
        "transient" => SessionError::Transient(message),
        other => SessionError::Transient(format!("{other}: {message}")),
    }
}

/// Parse one stdout line into the monitor state.
fn apply_line(state: &mut MonitorState, line: &str) {
    if let Some(caps) = ERROR_LINE.captures(line) {
        state.error = Some(classify(&caps[1], &caps[2]));
    } else if let Some(caps) = PROGRESS_LINE.captures(line) {
        state.progress = Some(caps[1].to_string());
    }
}

fn spawn_stdout_monitor(
    job: JobHandle,
    stdout: Option<ChildStdout>,
    state: Arc<Mutex<MonitorState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(stdout) = stdout else {
            warn!(job = %job, "no stdout pipe available for bridge process");
            return;
        };
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(job = %job, "stdout: {}", line);
            apply_line(&mut lock(&state), &line);
        }
    })
}
