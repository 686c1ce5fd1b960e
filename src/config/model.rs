// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::EngineOptions;
use crate::session::CommandSpec;
use crate::task::TaskSpec;

/// Configuration exactly as read from TOML, before validation.
///
/// ```toml
/// [engine]
/// max_retries = 2
/// poll_interval = "2s"
///
/// [session]
/// count = 2
/// command = "genqueue-bridge"
///
/// [[task]]
/// prompt = "a lighthouse at dusk"
/// task_type = "text-to-video"
/// aspect_ratio = "16:9"
/// resolution = "720p"
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: RawEngineSection,

    #[serde(default)]
    pub session: SessionSection,

    /// Batch of tasks to enqueue at startup.
    #[serde(default)]
    pub task: Vec<TaskSpec>,
}

/// `[engine]` section. Durations are strings like `"500ms"`, `"3s"`, `"10m"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEngineSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_failure_threshold")]
    pub session_failure_threshold: u32,
    #[serde(default = "default_session_cooldown")]
    pub session_cooldown: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default = "default_task_timeout")]
    pub task_timeout: String,
    #[serde(default = "default_dispatch_backoff")]
    pub dispatch_backoff: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_max_retries() -> u32 {
    2
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_session_cooldown() -> String {
    "3s".to_string()
}

fn default_poll_interval() -> String {
    "2s".to_string()
}

fn default_request_timeout() -> String {
    "60s".to_string()
}

fn default_task_timeout() -> String {
    "10m".to_string()
}

fn default_dispatch_backoff() -> String {
    "500ms".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for RawEngineSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            session_failure_threshold: default_failure_threshold(),
            session_cooldown: default_session_cooldown(),
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
            task_timeout: default_task_timeout(),
            dispatch_backoff: default_dispatch_backoff(),
            output_dir: default_output_dir(),
        }
    }
}

/// `[session]` section: how many bridge sessions to run and which program
/// backs them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSection {
    #[serde(default = "default_session_count")]
    pub count: usize,
    #[serde(default = "default_session_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Scratch directory for in-flight artifacts. Defaults to a
    /// `genqueue` directory under the system temp dir.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

fn default_session_count() -> usize {
    1
}

fn default_session_command() -> String {
    "genqueue-bridge".to_string()
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            count: default_session_count(),
            command: default_session_command(),
            args: Vec::new(),
            work_dir: None,
        }
    }
}

impl SessionSection {
    pub fn command_spec(&self) -> CommandSpec {
        CommandSpec {
            program: self.command.clone(),
            args: self.args.clone(),
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("genqueue"))
    }
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>`, so durations are
/// parsed and every batch task has passed admission.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineOptions,
    pub session: SessionSection,
    pub tasks: Vec<TaskSpec>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(engine: EngineOptions, session: SessionSection, tasks: Vec<TaskSpec>) -> Self {
        Self {
            engine,
            session,
            tasks,
        }
    }

    /// Engine options with a relative `output_dir` resolved against `base`.
    pub fn engine_options_relative_to(&self, base: &std::path::Path) -> EngineOptions {
        let mut options = self.engine.clone();
        if options.output_dir.is_relative() {
            options.output_dir = base.join(&options.output_dir);
        }
        options
    }
}

/// Parse `"<n><unit>"` with unit `ms`, `s`, `m` or `h`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    let too_large = || format!("duration '{s}' is too large");
    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(too_large),
        "h" => value
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(too_large),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}
