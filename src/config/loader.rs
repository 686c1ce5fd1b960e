// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a config file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Read, deserialize and validate a config file.
///
/// Relative reference image paths in `[[task]]` entries resolve against the
/// directory holding the config file, so a batch file can be run from
/// anywhere.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let mut raw = load_from_path(path)?;

    let base = config_root_dir(path);
    for task in raw.task.iter_mut() {
        for image in task.reference_images.iter_mut() {
            if image.is_relative() {
                *image = base.join(&*image);
            }
        }
    }

    ConfigFile::try_from(raw)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("genqueue.toml")
}

/// Directory holding the config file; `.` for a bare file name.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
