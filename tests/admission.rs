// tests/admission.rs

mod common;
use crate::common::*;

use proptest::prelude::*;

use genqueue::engine::AddTaskRequest;
use genqueue::errors::EngineError;
use genqueue::task::{AspectRatio, Resolution, TaskStatus, TaskType, ValidationError};

#[test]
fn frames_to_video_at_4k_is_refused_without_side_effects() {
    let probe = Probe::new();
    let (engine, fs) = mock_engine(fast_options(), scripted_sessions(1, &probe));
    fs.add_file("/refs/first.png", "a");
    fs.add_file("/refs/last.png", "b");

    let before = engine.get_status().counts.total();
    let mut request = add_request("Frames to Video", "4K", "a cat walking");
    request.reference_images = vec!["/refs/first.png".into(), "/refs/last.png".into()];

    let response = engine.add_task(request);

    assert!(!response.success);
    assert!(response.task_id.is_none());
    let error = response.error.unwrap();
    assert!(error.contains("4K"), "{error}");
    assert!(error.contains("1080p, 720p"), "{error}");
    assert_eq!(engine.get_status().counts.total(), before);
}

#[test]
fn loosely_typed_request_is_admitted() {
    let probe = Probe::new();
    let (engine, fs) = mock_engine(fast_options(), scripted_sessions(1, &probe));
    fs.add_file("/refs/first.png", "a");
    fs.add_file("/refs/last.png", "b");

    let mut request = add_request("frames-to-video", "1080P", "  a cat walking  ");
    request.aspect_ratio = "Portrait".to_string();
    request.reference_images = vec!["/refs/first.png".into(), "/refs/last.png".into()];

    let response = engine.add_task(request);
    assert!(response.success, "{:?}", response.error);

    let snap = engine.get_status();
    let task = snap.task(response.task_id.unwrap()).unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.spec.task_type, TaskType::FramesToVideo);
    assert_eq!(task.spec.aspect_ratio, AspectRatio::Portrait);
    assert_eq!(task.spec.resolution, Resolution::P1080);
    assert_eq!(task.retry_count, 0);
}

#[test]
fn unknown_enum_values_are_reported() {
    let probe = Probe::new();
    let (engine, _fs) = mock_engine(fast_options(), scripted_sessions(1, &probe));

    let response = engine.add_task(add_request("storyboard", "1K", "x"));
    assert!(!response.success);
    assert!(response.error.unwrap().contains("unknown task type"));

    let response = engine.add_task(add_request("image", "8K", "x"));
    assert!(!response.success);
    assert!(response.error.unwrap().contains("unknown resolution"));

    assert_eq!(engine.get_status().counts.total(), 0);
}

#[test]
fn missing_reference_image_is_refused() {
    let probe = Probe::new();
    let (engine, fs) = mock_engine(fast_options(), scripted_sessions(1, &probe));
    fs.add_file("/refs/present.png", "a");

    let spec = TaskSpecBuilder::new(TaskType::IngredientsToVideo, "mix these")
        .resolution(Resolution::P720)
        .reference("/refs/present.png")
        .reference("/refs/absent.png")
        .build();

    match engine.enqueue(spec) {
        Err(EngineError::Validation(ValidationError::MissingReferenceImage(path))) => {
            assert_eq!(path.to_str(), Some("/refs/absent.png"));
        }
        other => panic!("expected a missing reference image, got {other:?}"),
    }
    assert_eq!(engine.get_status().counts.total(), 0);
}

#[test]
fn reference_directory_is_not_an_image() {
    let probe = Probe::new();
    let (engine, fs) = mock_engine(fast_options(), scripted_sessions(1, &probe));
    fs.add_file("/refs/nested/a.png", "a");

    let spec = TaskSpecBuilder::image("")
        .reference("/refs/nested")
        .build();
    assert!(matches!(
        engine.enqueue(spec),
        Err(EngineError::Validation(ValidationError::MissingReferenceImage(_)))
    ));
}

#[test]
fn image_with_only_reference_images_needs_no_prompt() {
    let probe = Probe::new();
    let (engine, fs) = mock_engine(fast_options(), scripted_sessions(1, &probe));
    fs.add_file("/refs/a.png", "a");

    let blank = TaskSpecBuilder::image("   ").build();
    assert!(matches!(
        engine.enqueue(blank),
        Err(EngineError::Validation(ValidationError::EmptyPrompt))
    ));

    let with_reference = TaskSpecBuilder::image("").reference("/refs/a.png").build();
    assert!(engine.enqueue(with_reference).is_ok());
}

#[test]
fn request_deserializes_from_json() {
    let request: AddTaskRequest = serde_json::from_str(
        r#"{"prompt":"sunset","task_type":"Text to Video","aspect_ratio":"9:16","resolution":"720p"}"#,
    )
    .unwrap();
    let spec = request.to_spec().unwrap();

    assert_eq!(spec.task_type, TaskType::TextToVideo);
    assert_eq!(spec.aspect_ratio, AspectRatio::Portrait);
    assert!(spec.output_dir.is_none());
}

fn task_type_strategy() -> impl Strategy<Value = TaskType> {
    prop::sample::select(TaskType::ALL.to_vec())
}

fn resolution_strategy() -> impl Strategy<Value = Resolution> {
    prop::sample::select(Resolution::ALL.to_vec())
}

proptest! {
    #[test]
    fn admitted_tasks_always_have_an_allowed_resolution(
        candidates in prop::collection::vec(
            (task_type_strategy(), resolution_strategy(), 0usize..4, any::<bool>()),
            1..20,
        )
    ) {
        let probe = Probe::new();
        let (engine, fs) = mock_engine(fast_options(), scripted_sessions(1, &probe));
        for i in 0..3 {
            fs.add_file(format!("/refs/{i}.png"), "img");
        }

        for (task_type, resolution, refs, blank_prompt) in candidates {
            let prompt = if blank_prompt { "" } else { "something" };
            let mut builder = TaskSpecBuilder::new(task_type, prompt).resolution(resolution);
            for i in 0..refs {
                builder = builder.reference(format!("/refs/{i}.png"));
            }

            let before = engine.get_status().counts.total();
            let result = engine.enqueue(builder.build());
            let after = engine.get_status();

            match result {
                Ok(id) => {
                    let task = after.task(id).unwrap();
                    prop_assert!(task.spec.task_type.allows(task.spec.resolution));
                    prop_assert!(task.spec.task_type.reference_images().contains(&refs));
                    prop_assert_eq!(task.status, TaskStatus::Queued);
                    prop_assert_eq!(after.counts.total(), before + 1);
                }
                Err(_) => {
                    prop_assert_eq!(after.counts.total(), before);
                }
            }
        }

        let snap = engine.get_status();
        for task in &snap.tasks {
            prop_assert!(task.spec.task_type.allows(task.spec.resolution));
        }
    }
}
