// src/task/validate.rs

//! Admission control: checks run before a candidate becomes a task.

use std::ops::RangeInclusive;
use std::path::PathBuf;

use thiserror::Error;

use crate::fs::FileSystem;
use crate::task::model::{Resolution, TaskSpec, TaskType};

/// Why a candidate task was refused. Nothing is created when this is
/// returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("unknown aspect ratio: {0}")]
    UnknownAspectRatio(String),

    #[error("unknown resolution: {0}")]
    UnknownResolution(String),

    #[error("{task_type} does not support resolution {resolution} (allowed: {allowed})")]
    ResolutionNotAllowed {
        task_type: TaskType,
        resolution: Resolution,
        allowed: String,
    },

    #[error("{task_type} takes {expected} reference image(s), got {actual}")]
    ReferenceImageCount {
        task_type: TaskType,
        expected: String,
        actual: usize,
    },

    #[error("prompt is empty and no reference images were given")]
    EmptyPrompt,

    #[error("reference image not found: {}", .0.display())]
    MissingReferenceImage(PathBuf),
}

/// Validate a candidate against its task type's rules.
///
/// Checks, in order: resolution membership, reference-image cardinality,
/// prompt presence, and that every reference image exists on `fs`.
pub fn validate_spec(spec: &TaskSpec, fs: &dyn FileSystem) -> Result<(), ValidationError> {
    let task_type = spec.task_type;

    if !task_type.allows(spec.resolution) {
        let allowed: Vec<&str> = task_type
            .allowed_resolutions()
            .iter()
            .map(|r| r.as_str())
            .collect();
        return Err(ValidationError::ResolutionNotAllowed {
            task_type,
            resolution: spec.resolution,
            allowed: allowed.join(", "),
        });
    }

    let range = task_type.reference_images();
    let actual = spec.reference_images.len();
    if !range.contains(&actual) {
        return Err(ValidationError::ReferenceImageCount {
            task_type,
            expected: describe_count(&range),
            actual,
        });
    }

    if spec.prompt.trim().is_empty() && spec.reference_images.is_empty() {
        return Err(ValidationError::EmptyPrompt);
    }

    if let Some(missing) = spec.reference_images.iter().find(|p| !fs.is_file(p)) {
        return Err(ValidationError::MissingReferenceImage(missing.clone()));
    }

    Ok(())
}

fn describe_count(range: &RangeInclusive<usize>) -> String {
    let (lo, hi) = (*range.start(), *range.end());
    match (lo, hi) {
        (0, 0) => "no".to_string(),
        (lo, hi) if lo == hi => format!("exactly {lo}"),
        (0, hi) => format!("at most {hi}"),
        (lo, hi) => format!("{lo} to {hi}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;
    use crate::task::model::AspectRatio;

    fn spec(task_type: TaskType, resolution: Resolution, refs: &[&str]) -> TaskSpec {
        TaskSpec {
            prompt: "a red fox in snow".to_string(),
            task_type,
            aspect_ratio: AspectRatio::Landscape,
            resolution,
            reference_images: refs.iter().map(PathBuf::from).collect(),
            output_dir: None,
            name: None,
        }
    }

    #[test]
    fn frames_to_video_rejects_4k() {
        let fs = MockFileSystem::new();
        let err = validate_spec(
            &spec(TaskType::FramesToVideo, Resolution::R4K, &[]),
            &fs,
        )
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "frames-to-video does not support resolution 4K (allowed: 1080p, 720p)"
        );
    }

    #[test]
    fn frames_to_video_needs_exactly_two_frames() {
        let fs = MockFileSystem::new();
        fs.add_file("/in/first.png", b"1".to_vec());

        let err = validate_spec(
            &spec(TaskType::FramesToVideo, Resolution::P720, &["/in/first.png"]),
            &fs,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            ValidationError::ReferenceImageCount { actual: 1, .. }
        ));
        assert!(err.to_string().contains("exactly 2"));
    }

    #[test]
    fn text_to_video_takes_no_reference_images() {
        let fs = MockFileSystem::new();
        fs.add_file("/in/a.png", b"a".to_vec());

        let err = validate_spec(
            &spec(TaskType::TextToVideo, Resolution::P1080, &["/in/a.png"]),
            &fs,
        )
        .unwrap_err();

        assert!(err.to_string().contains("takes no reference image(s)"));
    }

    #[test]
    fn empty_prompt_allowed_only_with_references() {
        let fs = MockFileSystem::new();
        fs.add_file("/in/a.png", b"a".to_vec());

        let mut with_refs = spec(TaskType::IngredientsToVideo, Resolution::P720, &["/in/a.png"]);
        with_refs.prompt = "  ".to_string();
        assert_eq!(validate_spec(&with_refs, &fs), Ok(()));

        let mut without = spec(TaskType::CreateImage, Resolution::R1K, &[]);
        without.prompt = String::new();
        assert_eq!(validate_spec(&without, &fs), Err(ValidationError::EmptyPrompt));
    }

    #[test]
    fn missing_reference_file_is_rejected() {
        let fs = MockFileSystem::new();
        fs.add_file("/in/a.png", b"a".to_vec());

        let err = validate_spec(
            &spec(TaskType::FramesToVideo, Resolution::P720, &["/in/a.png", "/in/b.png"]),
            &fs,
        )
        .unwrap_err();

        assert_eq!(err, ValidationError::MissingReferenceImage(PathBuf::from("/in/b.png")));
    }
}
