// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, RawConfigFile, RawEngineSection, parse_duration};
use crate::engine::EngineOptions;
use crate::errors::{EngineError, Result};
use crate::fs::{FileSystem, RealFileSystem};
use crate::task::validate_spec;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = EngineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw, &RealFileSystem)?;
        let engine = engine_options(&raw.engine)?;
        Ok(ConfigFile::new_unchecked(engine, raw.session, raw.task))
    }
}

/// Check a raw config against `fs`.
///
/// Every `[[task]]` entry is checked; if any fails, the error lists all of
/// them and nothing from the batch should be enqueued.
pub fn validate_config(cfg: &RawConfigFile, fs: &dyn FileSystem) -> Result<()> {
    engine_options(&cfg.engine)?;
    validate_session(cfg)?;
    validate_tasks(cfg, fs)?;
    Ok(())
}

fn engine_options(raw: &RawEngineSection) -> Result<EngineOptions> {
    Ok(EngineOptions {
        max_retries: raw.max_retries,
        session_failure_threshold: raw.session_failure_threshold,
        session_cooldown: duration("session_cooldown", &raw.session_cooldown, true)?,
        poll_interval: duration("poll_interval", &raw.poll_interval, false)?,
        request_timeout: duration("request_timeout", &raw.request_timeout, false)?,
        task_timeout: duration("task_timeout", &raw.task_timeout, false)?,
        dispatch_backoff: duration("dispatch_backoff", &raw.dispatch_backoff, false)?,
        output_dir: raw.output_dir.clone(),
    })
}

fn duration(key: &str, value: &str, allow_zero: bool) -> Result<Duration> {
    let parsed = parse_duration(value)
        .map_err(|e| EngineError::Config(format!("[engine].{key}: {e}")))?;
    if parsed.is_zero() && !allow_zero {
        return Err(EngineError::Config(format!(
            "[engine].{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}

fn validate_session(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.session_failure_threshold == 0 {
        return Err(EngineError::Config(
            "[engine].session_failure_threshold must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.session.count == 0 {
        return Err(EngineError::Config(
            "[session].count must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.session.command.trim().is_empty() {
        return Err(EngineError::Config(
            "[session].command must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile, fs: &dyn FileSystem) -> Result<()> {
    let errors: Vec<String> = cfg
        .task
        .iter()
        .enumerate()
        .filter_map(|(i, spec)| {
            validate_spec(spec, fs).err().map(|e| {
                let label = spec.name.as_deref().map(|n| format!(" ({n})")).unwrap_or_default();
                format!("[[task]] #{}{label}: {e}", i + 1)
            })
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Config(format!(
            "{} invalid task(s):\n  {}",
            errors.len(),
            errors.join("\n  ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    fn parse(toml_src: &str) -> RawConfigFile {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let raw = parse("");
        validate_config(&raw, &MockFileSystem::new()).unwrap();
        let options = engine_options(&raw.engine).unwrap();
        assert_eq!(options, EngineOptions::default());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let raw = parse("[engine]\npoll_interval = \"0s\"\n");
        let err = validate_config(&raw, &MockFileSystem::new()).unwrap_err();
        assert!(err.to_string().contains("poll_interval"), "{err}");
    }

    #[test]
    fn every_bad_task_is_reported() {
        let raw = parse(
            r#"
            [[task]]
            prompt = "ok"
            task_type = "create-image"
            aspect_ratio = "16:9"
            resolution = "4K"

            [[task]]
            prompt = "bad res"
            task_type = "frames-to-video"
            aspect_ratio = "16:9"
            resolution = "4K"
            reference_images = ["/a.png", "/b.png"]

            [[task]]
            name = "needs-refs"
            prompt = "bad count"
            task_type = "ingredients-to-video"
            aspect_ratio = "9:16"
            resolution = "720p"
            "#,
        );
        let fs = MockFileSystem::new();
        fs.add_file("/a.png", b"a".to_vec());
        fs.add_file("/b.png", b"b".to_vec());

        let err = validate_config(&raw, &fs).unwrap_err().to_string();
        assert!(err.contains("2 invalid task(s)"), "{err}");
        assert!(err.contains("#2"), "{err}");
        assert!(err.contains("#3 (needs-refs)"), "{err}");
        assert!(!err.contains("#1"), "{err}");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: std::result::Result<RawConfigFile, _> = toml::from_str("[engine]\nretries = 3\n");
        assert!(parsed.is_err());
    }
}
