#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use genqueue::engine::{AddTaskRequest, EngineOptions};
use genqueue::task::{AspectRatio, Resolution, TaskSpec, TaskType};

/// Engine options with every delay shrunk for tests.
///
/// Artifacts go under `/out` so they work with `MockFileSystem`.
pub fn fast_options() -> EngineOptions {
    EngineOptions {
        max_retries: 2,
        session_failure_threshold: 100,
        session_cooldown: Duration::ZERO,
        poll_interval: Duration::from_millis(5),
        request_timeout: Duration::from_secs(2),
        task_timeout: Duration::from_secs(5),
        dispatch_backoff: Duration::from_millis(10),
        output_dir: PathBuf::from("/out"),
    }
}

/// Builder for `TaskSpec`.
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new(task_type: TaskType, prompt: &str) -> Self {
        let resolution = task_type.allowed_resolutions()[0];
        Self {
            spec: TaskSpec {
                prompt: prompt.to_string(),
                task_type,
                aspect_ratio: AspectRatio::Landscape,
                resolution,
                reference_images: Vec::new(),
                output_dir: None,
                name: None,
            },
        }
    }

    /// Image synthesis at 1K.
    pub fn image(prompt: &str) -> Self {
        Self::new(TaskType::CreateImage, prompt).resolution(Resolution::R1K)
    }

    /// Text-to-video at 720p.
    pub fn video(prompt: &str) -> Self {
        Self::new(TaskType::TextToVideo, prompt).resolution(Resolution::P720)
    }

    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.spec.resolution = resolution;
        self
    }

    pub fn portrait(mut self) -> Self {
        self.spec.aspect_ratio = AspectRatio::Portrait;
        self
    }

    pub fn reference(mut self, path: impl AsRef<Path>) -> Self {
        self.spec.reference_images.push(path.as_ref().to_path_buf());
        self
    }

    pub fn output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.spec.output_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.spec.name = Some(name.to_string());
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}

/// A loosely typed request, the way an external caller would send it.
pub fn add_request(task_type: &str, resolution: &str, prompt: &str) -> AddTaskRequest {
    AddTaskRequest {
        prompt: prompt.to_string(),
        task_type: task_type.to_string(),
        aspect_ratio: "16:9".to_string(),
        resolution: resolution.to_string(),
        ..AddTaskRequest::default()
    }
}
