// src/fs/mock.rs

use super::FileSystem;
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MockTree {
    files: HashMap<PathBuf, Vec<u8>>,
    dirs: HashSet<PathBuf>,
}

/// In-memory filesystem shared between clones.
///
/// Writes implicitly create every ancestor directory, like
/// [`super::RealFileSystem::write`].
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    tree: Arc<Mutex<MockTree>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let mut tree = self.lock();

        let mut parent = path.parent();
        while let Some(dir) = parent {
            if dir.as_os_str().is_empty() {
                break;
            }
            tree.dirs.insert(dir.to_path_buf());
            parent = dir.parent();
        }

        tree.files.insert(path, content.into());
    }

    /// Paths of every file currently stored, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        let tree = self.lock();
        let mut paths: Vec<PathBuf> = tree.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn lock(&self) -> MutexGuard<'_, MockTree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FileSystem for MockFileSystem {
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let tree = self.lock();
        tree.files.contains_key(path) || tree.dirs.contains(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_file_registers_ancestor_dirs() {
        let fs = MockFileSystem::new();
        fs.add_file("/refs/a/first.png", b"x".to_vec());

        assert!(fs.is_file(Path::new("/refs/a/first.png")));
        assert!(fs.exists(Path::new("/refs/a")));
        assert!(fs.exists(Path::new("/refs")));
        assert!(!fs.is_file(Path::new("/refs")));
    }
}
