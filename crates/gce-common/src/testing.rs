//! In-memory [`HostFilesystem`] for tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{GceError, HostFilesystem, PathKind, Result};

#[derive(Debug, Default)]
struct State {
    entries: HashMap<PathBuf, PathKind>,
    formatted: HashMap<PathBuf, usize>,
    mounts: HashMap<PathBuf, PathBuf>,
    fail_mount: HashSet<PathBuf>,
    mount_calls: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemFilesystem {
    state: Arc<Mutex<State>>,
}

impl MemFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl Into<PathBuf>) {
        self.lock().entries.insert(path.into(), PathKind::File);
    }

    pub fn add_device(&self, path: impl Into<PathBuf>) {
        self.lock().entries.insert(path.into(), PathKind::Other);
    }

    pub fn remove(&self, path: &Path) {
        self.lock().entries.remove(path);
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.lock().entries.contains_key(path)
    }

    /// Number of times a filesystem was written to `device`.
    pub fn format_count(&self, device: &Path) -> usize {
        self.lock().formatted.get(device).copied().unwrap_or(0)
    }

    /// Device currently mounted at `target`.
    pub fn mounted(&self, target: &Path) -> Option<PathBuf> {
        self.lock().mounts.get(target).cloned()
    }

    pub fn mount_calls(&self) -> usize {
        self.lock().mount_calls
    }

    /// Makes the next mounts of `target` fail.
    pub fn fail_mount(&self, target: impl Into<PathBuf>) {
        self.lock().fail_mount.insert(target.into());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl HostFilesystem for MemFilesystem {
    async fn path_kind(&self, path: &Path) -> Result<Option<PathKind>> {
        Ok(self.lock().entries.get(path).copied())
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        for dir in path.ancestors() {
            match state.entries.get(dir) {
                Some(PathKind::Directory) | None => {}
                Some(_) => {
                    return Err(GceError::Io(std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        format!("{} is not a directory", dir.display()),
                    )))
                }
            }
        }
        state.entries.insert(path.to_path_buf(), PathKind::Directory);
        Ok(())
    }

    async fn format(&self, device: &Path) -> Result<bool> {
        let mut state = self.lock();
        if !state.entries.contains_key(device) {
            return Err(GceError::Command {
                command: format!("mkfs.ext4 -F {}", device.display()),
                output: "No such file or directory".into(),
            });
        }
        let count = state.formatted.entry(device.to_path_buf()).or_default();
        if *count > 0 {
            return Ok(false);
        }
        *count += 1;
        Ok(true)
    }

    async fn mount(&self, device: &Path, target: &Path) -> Result<()> {
        let mut state = self.lock();
        state.mount_calls += 1;
        if state.fail_mount.contains(target) {
            return Err(GceError::Command {
                command: format!("mount {} {}", device.display(), target.display()),
                output: "mount failed".into(),
            });
        }
        state
            .mounts
            .insert(target.to_path_buf(), device.to_path_buf());
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        match self.lock().mounts.remove(target) {
            Some(_) => Ok(()),
            None => Err(GceError::Command {
                command: format!("umount {}", target.display()),
                output: format!("umount: {}: not mounted.", target.display()),
            }),
        }
    }
}
