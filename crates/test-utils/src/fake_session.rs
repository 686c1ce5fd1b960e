use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use genqueue::session::{
    Artifact, JobHandle, JobRequest, JobStatus, Session, SessionError, SessionFuture,
};
use genqueue::task::TaskId;

/// What a `ScriptedSession` does with one submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    /// Complete after the configured number of processing polls.
    Succeed,
    /// Refuse the submission itself.
    FailOnSubmit(SessionError),
    /// Accept the job, then fail when it would have completed.
    FailOnPoll(SessionError),
    /// Report `Processing` forever.
    Hang,
}

/// Shared instrumentation for a group of scripted sessions.
#[derive(Debug, Default)]
pub struct Probe {
    inner: Mutex<ProbeState>,
}

#[derive(Debug, Default)]
struct ProbeState {
    active_per_session: HashMap<String, usize>,
    max_per_session: usize,
    active_total: usize,
    max_total: usize,
    submissions: Vec<(String, TaskId)>,
    completions: Vec<TaskId>,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self, session: &str, task: TaskId) {
        let mut guard = self.inner.lock().unwrap();
        let s = &mut *guard;
        let active = s.active_per_session.entry(session.to_string()).or_default();
        *active += 1;
        let active = *active;
        s.max_per_session = s.max_per_session.max(active);
        s.active_total += 1;
        s.max_total = s.max_total.max(s.active_total);
        s.submissions.push((session.to_string(), task));
    }

    fn exit(&self, session: &str) {
        let mut s = self.inner.lock().unwrap();
        if let Some(active) = s.active_per_session.get_mut(session) {
            *active = active.saturating_sub(1);
        }
        s.active_total = s.active_total.saturating_sub(1);
    }

    fn complete(&self, task: TaskId) {
        self.inner.lock().unwrap().completions.push(task);
    }

    /// Highest number of jobs ever in flight on a single session.
    pub fn max_concurrent_per_session(&self) -> usize {
        self.inner.lock().unwrap().max_per_session
    }

    /// Highest number of jobs ever in flight across all sessions.
    pub fn max_concurrent_total(&self) -> usize {
        self.inner.lock().unwrap().max_total
    }

    pub fn active_total(&self) -> usize {
        self.inner.lock().unwrap().active_total
    }

    /// Submitted task ids in submission order.
    pub fn submissions(&self) -> Vec<TaskId> {
        self.inner
            .lock()
            .unwrap()
            .submissions
            .iter()
            .map(|(_, t)| *t)
            .collect()
    }

    pub fn submissions_of(&self, task: TaskId) -> usize {
        self.submissions().into_iter().filter(|t| *t == task).count()
    }

    pub fn sessions_used(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .unwrap()
            .submissions
            .iter()
            .map(|(s, _)| s.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Fetched task ids in completion order.
    pub fn completions(&self) -> Vec<TaskId> {
        self.inner.lock().unwrap().completions.clone()
    }
}

/// Holds jobs in `Processing` until opened.
#[derive(Debug, Default)]
pub struct Gate {
    open: AtomicBool,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Job {
    task: TaskId,
    behaviour: Scripted,
    polls_left: usize,
    active: bool,
}

/// A `Session` whose outcomes are scripted per submission.
#[derive(Debug)]
pub struct ScriptedSession {
    name: String,
    probe: Arc<Probe>,
    script: Mutex<VecDeque<Scripted>>,
    default: Scripted,
    polls: usize,
    gate: Option<Arc<Gate>>,
    next_job: AtomicU64,
    jobs: Mutex<HashMap<JobHandle, Job>>,
}

impl ScriptedSession {
    pub fn new(name: &str, probe: Arc<Probe>) -> Self {
        Self {
            name: name.to_string(),
            probe,
            script: Mutex::new(VecDeque::new()),
            default: Scripted::Succeed,
            polls: 1,
            gate: None,
            next_job: AtomicU64::new(0),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Behaviour once the script is exhausted.
    pub fn with_default(mut self, behaviour: Scripted) -> Self {
        self.default = behaviour;
        self
    }

    /// Behaviours for the first submissions, in order.
    pub fn with_script(self, script: impl IntoIterator<Item = Scripted>) -> Self {
        self.script.lock().unwrap().extend(script);
        self
    }

    /// Number of `Processing` polls before a job completes.
    pub fn with_polls(mut self, polls: usize) -> Self {
        self.polls = polls;
        self
    }

    pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn into_dyn(self) -> Arc<dyn Session> {
        Arc::new(self)
    }

    /// Mark the job as no longer holding the session.
    fn finish(&self, job: &JobHandle) {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(entry) = jobs.get_mut(job) else {
            return;
        };
        if entry.active {
            entry.active = false;
            self.probe.exit(&self.name);
        }
    }

    fn do_submit(&self, request: &JobRequest) -> Result<JobHandle, SessionError> {
        let behaviour = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        self.probe.enter(&self.name, request.task_id);
        if let Scripted::FailOnSubmit(err) = behaviour {
            self.probe.exit(&self.name);
            return Err(err);
        }

        let n = self.next_job.fetch_add(1, Ordering::SeqCst);
        let handle = JobHandle(format!("{}-{}", self.name, n));
        self.jobs.lock().unwrap().insert(
            handle.clone(),
            Job {
                task: request.task_id,
                behaviour,
                polls_left: self.polls,
                active: true,
            },
        );
        Ok(handle)
    }

    fn do_poll(&self, job: &JobHandle) -> Result<JobStatus, SessionError> {
        if let Some(gate) = &self.gate {
            if !gate.is_open() {
                return Ok(JobStatus::processing("waiting at gate"));
            }
        }

        let failure = {
            let mut jobs = self.jobs.lock().unwrap();
            let Some(entry) = jobs.get_mut(job) else {
                return Err(SessionError::Transient(format!("unknown job {job}")));
            };
            match &entry.behaviour {
                Scripted::Hang => return Ok(JobStatus::processing("stuck")),
                _ if entry.polls_left > 0 => {
                    entry.polls_left -= 1;
                    return Ok(JobStatus::processing("rendering"));
                }
                Scripted::FailOnPoll(err) => err.clone(),
                _ => return Ok(JobStatus::completed()),
            }
        };

        self.finish(job);
        Err(failure)
    }

    fn do_fetch(&self, job: &JobHandle) -> Result<Artifact, SessionError> {
        let task = self
            .jobs
            .lock()
            .unwrap()
            .get(job)
            .map(|j| j.task)
            .ok_or_else(|| SessionError::Transient(format!("unknown job {job}")))?;

        self.finish(job);
        self.probe.complete(task);
        Ok(Artifact {
            bytes: format!("artifact for {task}").into_bytes(),
        })
    }
}

impl Session for ScriptedSession {
    fn submit<'a>(&'a self, request: &'a JobRequest) -> SessionFuture<'a, JobHandle> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.do_submit(request)
        })
    }

    fn poll<'a>(&'a self, job: &'a JobHandle) -> SessionFuture<'a, JobStatus> {
        Box::pin(async move { self.do_poll(job) })
    }

    fn fetch<'a>(&'a self, job: &'a JobHandle) -> SessionFuture<'a, Artifact> {
        Box::pin(async move { self.do_fetch(job) })
    }

    fn abandon(&self, job: &JobHandle) {
        self.finish(job);
    }
}

/// `n` scripted sessions sharing one probe, all with default behaviour.
pub fn scripted_sessions(n: usize, probe: &Arc<Probe>) -> Vec<Arc<dyn Session>> {
    (0..n)
        .map(|i| ScriptedSession::new(&format!("s{i}"), probe.clone()).into_dyn())
        .collect()
}
