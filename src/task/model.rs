// src/task/model.rs

//! Task parameters, lifecycle status and the stored task record.

use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionId;
use crate::task::validate::ValidationError;

/// Identifier assigned at enqueue time. Ids increase with arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Kind of generation job. Each kind fixes the resolutions it accepts and
/// how many reference images it takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TaskType {
    CreateImage,
    TextToVideo,
    FramesToVideo,
    IngredientsToVideo,
    MultiReferenceToVideo,
}

const IMAGE_RESOLUTIONS: &[Resolution] = &[Resolution::R4K, Resolution::R2K, Resolution::R1K];
const VIDEO_RESOLUTIONS: &[Resolution] = &[Resolution::P1080, Resolution::P720];

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::CreateImage,
        TaskType::TextToVideo,
        TaskType::FramesToVideo,
        TaskType::IngredientsToVideo,
        TaskType::MultiReferenceToVideo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CreateImage => "create-image",
            TaskType::TextToVideo => "text-to-video",
            TaskType::FramesToVideo => "frames-to-video",
            TaskType::IngredientsToVideo => "ingredients-to-video",
            TaskType::MultiReferenceToVideo => "multi-reference-to-video",
        }
    }

    pub fn is_video(&self) -> bool {
        !matches!(self, TaskType::CreateImage)
    }

    pub fn allowed_resolutions(&self) -> &'static [Resolution] {
        if self.is_video() {
            VIDEO_RESOLUTIONS
        } else {
            IMAGE_RESOLUTIONS
        }
    }

    pub fn allows(&self, resolution: Resolution) -> bool {
        self.allowed_resolutions().contains(&resolution)
    }

    /// Inclusive bounds on the number of reference images.
    pub fn reference_images(&self) -> RangeInclusive<usize> {
        match self {
            TaskType::CreateImage => 0..=8,
            TaskType::TextToVideo => 0..=0,
            TaskType::FramesToVideo => 2..=2,
            TaskType::IngredientsToVideo => 1..=3,
            TaskType::MultiReferenceToVideo => 1..=8,
        }
    }

    /// File extension of the produced artifact.
    pub fn artifact_extension(&self) -> &'static str {
        if self.is_video() { "mp4" } else { "png" }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the kebab-case names plus the spaced display names used by
/// spreadsheet imports ("Text to Video"), case-insensitively.
impl FromStr for TaskType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '_' { '-' } else { c })
            .collect();

        match key.as_str() {
            "create-image" | "image" => Ok(TaskType::CreateImage),
            "text-to-video" => Ok(TaskType::TextToVideo),
            "frames-to-video" => Ok(TaskType::FramesToVideo),
            "ingredients-to-video" => Ok(TaskType::IngredientsToVideo),
            "multi-reference-to-video" => Ok(TaskType::MultiReferenceToVideo),
            _ => Err(ValidationError::UnknownTaskType(s.trim().to_string())),
        }
    }
}

impl TryFrom<String> for TaskType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskType> for String {
    fn from(value: TaskType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AspectRatio {
    Landscape,
    Portrait,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "16:9" | "landscape" => Ok(AspectRatio::Landscape),
            "9:16" | "portrait" => Ok(AspectRatio::Portrait),
            _ => Err(ValidationError::UnknownAspectRatio(s.trim().to_string())),
        }
    }
}

impl TryFrom<String> for AspectRatio {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AspectRatio> for String {
    fn from(value: AspectRatio) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resolution {
    R1K,
    R2K,
    R4K,
    P720,
    P1080,
}

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Resolution::R1K,
        Resolution::R2K,
        Resolution::R4K,
        Resolution::P720,
        Resolution::P1080,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::R1K => "1K",
            Resolution::R2K => "2K",
            Resolution::R4K => "4K",
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1k" => Ok(Resolution::R1K),
            "2k" => Ok(Resolution::R2K),
            "4k" => Ok(Resolution::R4K),
            "720p" => Ok(Resolution::P720),
            "1080p" => Ok(Resolution::P1080),
            _ => Err(ValidationError::UnknownResolution(s.trim().to_string())),
        }
    }
}

impl TryFrom<String> for Resolution {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.as_str().to_string()
    }
}

/// Candidate task parameters, as submitted by a caller.
///
/// A `TaskSpec` only becomes a [`Task`] after admission control accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub prompt: String,
    pub task_type: TaskType,
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
    #[serde(default)]
    pub reference_images: Vec<PathBuf>,
    /// Destination directory; relative paths resolve against the engine's
    /// configured output base.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Optional artifact file stem (e.g. a batch row label).
    #[serde(default)]
    pub name: Option<String>,
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored task record. Owned exclusively by the task store; everything else
/// sees clones taken under the engine lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(flatten)]
    pub spec: TaskSpec,
    pub status: TaskStatus,
    /// Advisory progress or failure text.
    pub status_detail: String,
    pub retry_count: u32,
    /// Session bound to the current attempt, while `Running`.
    pub session: Option<SessionId>,
    /// Resolved directory the artifact was written to.
    pub saved_dir: Option<PathBuf>,
    pub saved_path: Option<PathBuf>,
    /// Task created from this one by a resubmission, if any.
    pub resubmitted_as: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            spec,
            status: TaskStatus::Queued,
            status_detail: String::new(),
            retry_count: 0,
            session: None,
            saved_dir: None,
            saved_path: None,
            resubmitted_as: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn artifact_extension(&self) -> &'static str {
        self.spec.task_type.artifact_extension()
    }
}
