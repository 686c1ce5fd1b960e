// src/artifact.rs

//! Persisting fetched artifacts.
//!
//! Naming rules:
//! - The destination directory is the task's `output_dir`, resolved against
//!   the configured base when relative, or the base itself when unset.
//! - A named task is written to `<dir>/<name>.<ext>`. The dispatcher skips
//!   a named task whose file is already there.
//! - Otherwise the stem is a local timestamp (`%Y-%m-%d_%H-%M-%S`), with
//!   `_1`, `_2`, ... appended until the path is unused.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, bail};
use chrono::{DateTime, Local};
use tracing::debug;

use crate::fs::FileSystem;
use crate::task::Task;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Where an artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub dir: PathBuf,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    fs: Arc<dyn FileSystem>,
    base_dir: PathBuf,
    // Serialises name selection and the write so two unnamed artifacts
    // finishing in the same second never pick the same path.
    naming: Arc<Mutex<()>>,
}

impl ArtifactWriter {
    pub fn new(fs: Arc<dyn FileSystem>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            base_dir: base_dir.into(),
            naming: Arc::new(Mutex::new(())),
        }
    }

    /// Directory the artifact of `task` will be written to.
    pub fn resolve_dir(&self, task: &Task) -> PathBuf {
        match &task.spec.output_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.base_dir.join(dir),
            None => self.base_dir.clone(),
        }
    }

    /// `<dir>/<name>.<ext>` for a task with a non-blank name.
    pub fn named_path(&self, task: &Task) -> Option<PathBuf> {
        let name = task.spec.name.as_deref().map(str::trim)?;
        if name.is_empty() {
            return None;
        }
        let ext = task.artifact_extension();
        Some(self.resolve_dir(task).join(format!("{}.{ext}", sanitize(name))))
    }

    pub fn save(&self, task: &Task, bytes: &[u8]) -> Result<SavedArtifact> {
        self.save_at(task, bytes, Local::now())
    }

    fn save_at(&self, task: &Task, bytes: &[u8], now: DateTime<Local>) -> Result<SavedArtifact> {
        if bytes.is_empty() {
            bail!("artifact for {} is empty", task.id);
        }

        let dir = self.resolve_dir(task);
        let ext = task.artifact_extension();
        let _guard = self.naming.lock().unwrap_or_else(PoisonError::into_inner);

        let path = match self.named_path(task) {
            Some(path) => path,
            None => self.unused_timestamp_path(&dir, ext, now),
        };

        self.fs.write(&path, bytes)?;
        debug!(task = %task.id, path = ?path, len = bytes.len(), "artifact written");

        Ok(SavedArtifact { dir, path })
    }

    fn unused_timestamp_path(&self, dir: &Path, ext: &str, now: DateTime<Local>) -> PathBuf {
        let stem = now.format(TIMESTAMP_FORMAT).to_string();
        let first = dir.join(format!("{stem}.{ext}"));
        if !self.fs.exists(&first) {
            return first;
        }
        (1..)
            .map(|n| dir.join(format!("{stem}_{n}.{ext}")))
            .find(|candidate| !self.fs.exists(candidate))
            .unwrap_or(first)
    }
}

/// Keep a name usable as a single path component.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::fs::MockFileSystem;
    use crate::task::{AspectRatio, Resolution, TaskId, TaskSpec, TaskType};

    fn task(output_dir: Option<&str>, name: Option<&str>, task_type: TaskType) -> Task {
        Task::new(
            TaskId(1),
            TaskSpec {
                prompt: "p".into(),
                task_type,
                aspect_ratio: AspectRatio::Landscape,
                resolution: Resolution::P720,
                reference_images: Vec::new(),
                output_dir: output_dir.map(PathBuf::from),
                name: name.map(str::to_string),
            },
        )
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).single().unwrap()
    }

    #[test]
    fn named_artifact_uses_name_and_extension() {
        let fs = Arc::new(MockFileSystem::new());
        let writer = ArtifactWriter::new(fs.clone(), "/base");
        let t = task(Some("batch"), Some("row/7"), TaskType::TextToVideo);

        let saved = writer.save_at(&t, b"video", at()).unwrap();
        assert_eq!(saved.dir, PathBuf::from("/base/batch"));
        assert_eq!(saved.path, PathBuf::from("/base/batch/row_7.mp4"));
        assert_eq!(fs.files(), vec![PathBuf::from("/base/batch/row_7.mp4")]);
    }

    #[test]
    fn unnamed_artifacts_get_unique_timestamp_names() {
        let fs = Arc::new(MockFileSystem::new());
        let writer = ArtifactWriter::new(fs.clone(), "/base");
        let t = task(None, None, TaskType::CreateImage);

        let a = writer.save_at(&t, b"1", at()).unwrap();
        let b = writer.save_at(&t, b"2", at()).unwrap();
        let c = writer.save_at(&t, b"3", at()).unwrap();

        assert_eq!(a.path, PathBuf::from("/base/2026-03-01_12-30-05.png"));
        assert_eq!(b.path, PathBuf::from("/base/2026-03-01_12-30-05_1.png"));
        assert_eq!(c.path, PathBuf::from("/base/2026-03-01_12-30-05_2.png"));
    }

    #[test]
    fn absolute_output_dir_ignores_base() {
        let fs = Arc::new(MockFileSystem::new());
        let writer = ArtifactWriter::new(fs, "/base");
        let t = task(Some("/elsewhere"), None, TaskType::CreateImage);
        assert_eq!(writer.resolve_dir(&t), PathBuf::from("/elsewhere"));
    }

    #[test]
    fn empty_artifact_is_an_error() {
        let fs = Arc::new(MockFileSystem::new());
        let writer = ArtifactWriter::new(fs.clone(), "/base");
        let t = task(None, Some("x"), TaskType::CreateImage);

        assert!(writer.save_at(&t, b"", at()).is_err());
        assert!(fs.files().is_empty());
    }
}
