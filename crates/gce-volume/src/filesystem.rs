//! Host mount, format and device primitives backed by the real system.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use gce_common::{GceError, HostFilesystem, PathKind, Result};

pub const DEFAULT_FS_TYPE: &str = "ext4";
pub const DEFAULT_MOUNT_OPTIONS: [&str; 2] = ["discard", "defaults"];

/// `blkid` exit status when the device carries no recognizable filesystem.
const BLKID_NOT_FOUND: i32 = 2;

/// Arguments for `mount`: `-t <fstype> -o <opts> <device> <target>`.
pub fn mount_args(device: &Path, target: &Path, fs_type: &str, options: &[&str]) -> Vec<String> {
    let mut args = Vec::new();
    if !fs_type.is_empty() {
        args.push("-t".to_string());
        args.push(fs_type.to_string());
    }
    if !options.is_empty() {
        args.push("-o".to_string());
        args.push(options.join(","));
    }
    args.push(device.display().to_string());
    args.push(target.display().to_string());
    args
}

async fn run(program: &str, args: &[String]) -> Result<Output> {
    debug!(%program, ?args, "running host command");
    Ok(Command::new(program).args(args).output().await?)
}

fn command_error(program: &str, args: &[String], output: &Output) -> GceError {
    let mut text = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if text.is_empty() {
        text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    }
    GceError::Command {
        command: format!("{program} {}", args.join(" ")),
        output: format!("{} ({})", text, output.status),
    }
}

#[derive(Debug, Clone, Default)]
pub struct OsFilesystem;

impl OsFilesystem {
    pub fn new() -> Self {
        Self
    }

    /// Filesystem type reported by `blkid`, `None` when the device is blank.
    async fn filesystem_type(&self, device: &Path) -> Result<Option<String>> {
        let args = vec![
            "-o".to_string(),
            "value".to_string(),
            "-s".to_string(),
            "TYPE".to_string(),
            device.display().to_string(),
        ];
        let output = run("blkid", &args).await?;

        match output.status.code() {
            Some(0) => {
                let fs_type = String::from_utf8_lossy(&output.stdout).trim().to_string();
                Ok(Some(fs_type).filter(|t| !t.is_empty()))
            }
            Some(BLKID_NOT_FOUND) => Ok(None),
            _ => Err(command_error("blkid", &args, &output)),
        }
    }
}

#[async_trait]
impl HostFilesystem for OsFilesystem {
    async fn path_kind(&self, path: &Path) -> Result<Option<PathKind>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(Some(PathKind::Directory)),
            Ok(meta) if meta.is_file() => Ok(Some(PathKind::File)),
            Ok(_) => Ok(Some(PathKind::Other)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn format(&self, device: &Path) -> Result<bool> {
        if let Some(fs_type) = self.filesystem_type(device).await? {
            debug!(device = %device.display(), %fs_type, "device already formatted");
            return Ok(false);
        }

        let args = vec!["-F".to_string(), device.display().to_string()];
        let program = format!("mkfs.{DEFAULT_FS_TYPE}");
        let output = run(&program, &args).await?;
        if !output.status.success() {
            return Err(command_error(&program, &args, &output));
        }

        info!(device = %device.display(), "device formatted");
        Ok(true)
    }

    async fn mount(&self, device: &Path, target: &Path) -> Result<()> {
        let args = mount_args(device, target, DEFAULT_FS_TYPE, &DEFAULT_MOUNT_OPTIONS);
        let output = run("mount", &args).await?;
        if !output.status.success() {
            return Err(command_error("mount", &args, &output));
        }
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        let args = vec![target.display().to_string()];
        let output = run("umount", &args).await?;
        if !output.status.success() {
            return Err(command_error("umount", &args, &output));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_args() {
        let args = mount_args(
            Path::new("/dev/disk/by-id/google-docker-volume-foo"),
            Path::new("/mnt/foo"),
            DEFAULT_FS_TYPE,
            &DEFAULT_MOUNT_OPTIONS,
        );
        assert_eq!(
            args,
            vec![
                "-t",
                "ext4",
                "-o",
                "discard,defaults",
                "/dev/disk/by-id/google-docker-volume-foo",
                "/mnt/foo"
            ]
        );

        let bare = mount_args(Path::new("/dev/sdb"), Path::new("/mnt/x"), "", &[]);
        assert_eq!(bare, vec!["/dev/sdb", "/mnt/x"]);
    }

    #[tokio::test]
    async fn test_path_kind_and_create_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = OsFilesystem::new();

        let dir = tmp.path().join("volumes/foo");
        assert_eq!(fs.path_kind(&dir).await.unwrap(), None);
        fs.create_dir_all(&dir).await.unwrap();
        assert_eq!(fs.path_kind(&dir).await.unwrap(), Some(PathKind::Directory));

        let file = tmp.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(fs.path_kind(&file).await.unwrap(), Some(PathKind::File));
    }
}
