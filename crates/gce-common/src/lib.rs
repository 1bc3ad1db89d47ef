// Shared types for the gce-docker daemon: errors, resource naming, the
// configs derived from plugin options and container labels, and the traits
// the reconcilers sit behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod naming;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::disk::DiskConfig;
pub use config::network::{NetworkConfig, PortBinding, Protocol, SessionAffinity, SourceFilter};

#[derive(Error, Debug)]
pub enum GceError {
    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Compute API Error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Operation {name} failed: {message}")]
    OperationFailed { name: String, message: String },

    #[error("device {volume:?} is not attached to instance {instance:?}")]
    NotAttached { volume: String, instance: String },

    #[error("error the mountpoint {0:?} already exists")]
    MountpointExists(PathBuf),

    #[error("Command `{command}` failed: {output}")]
    Command { command: String, output: String },

    #[error("Container Runtime Error: {0}")]
    Runtime(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

impl GceError {
    /// True for the "resource absent" signal that drives create-vs-no-op.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GceError::NotFound(_))
    }
}

// Define the primary Result type for gce-docker operations
pub type Result<T> = std::result::Result<T, GceError>;

/// Provisioning status of a persistent disk as reported by the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskStatus {
    Creating,
    Restoring,
    Failed,
    Ready,
    Deleting,
    Unknown(String),
}

impl DiskStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "CREATING" => DiskStatus::Creating,
            "RESTORING" => DiskStatus::Restoring,
            "FAILED" => DiskStatus::Failed,
            "READY" => DiskStatus::Ready,
            "DELETING" => DiskStatus::Deleting,
            other => DiskStatus::Unknown(other.to_string()),
        }
    }
}

/// A disk as seen by consumers of [`DiskProvider::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSummary {
    pub name: String,
    pub status: DiskStatus,
    pub size_gb: Option<u64>,
}

impl DiskSummary {
    pub fn is_ready(&self) -> bool {
        self.status == DiskStatus::Ready
    }
}

/// Persistent disk lifecycle on the local instance.
#[async_trait]
pub trait DiskProvider: Send + Sync {
    /// Creates the disk unless one with the same name already exists.
    async fn create(&self, config: &DiskConfig) -> Result<()>;

    /// Attaches the disk and waits until its device node exists on the host.
    async fn attach(&self, config: &DiskConfig) -> Result<()>;

    /// Detaches the disk and waits until its device node is gone.
    /// Fails with [`GceError::NotAttached`] when the disk is not attached.
    async fn detach(&self, config: &DiskConfig) -> Result<()>;

    async fn delete(&self, config: &DiskConfig) -> Result<()>;

    async fn list(&self) -> Result<Vec<DiskSummary>>;
}

/// Load-balancing objects fronting a container's published ports.
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    async fn create(&self, config: &NetworkConfig) -> Result<()>;

    async fn delete(&self, config: &NetworkConfig) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Directory,
    File,
    Other,
}

/// Host primitives used to put a block device behind a mount point.
#[async_trait]
pub trait HostFilesystem: Send + Sync {
    /// Returns `None` when nothing exists at `path`.
    async fn path_kind(&self, path: &Path) -> Result<Option<PathKind>>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Writes an ext4 filesystem unless the device already carries one.
    /// Returns whether a filesystem was written.
    async fn format(&self, device: &Path) -> Result<bool>;

    async fn mount(&self, device: &Path, target: &Path) -> Result<()>;

    async fn unmount(&self, target: &Path) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinguished() {
        assert!(GceError::NotFound("disks/foo".into()).is_not_found());
        assert!(!GceError::Api {
            code: 403,
            message: "forbidden".into()
        }
        .is_not_found());
    }

    #[test]
    fn disk_status_parses_known_and_unknown() {
        assert_eq!(DiskStatus::parse("READY"), DiskStatus::Ready);
        assert_eq!(
            DiskStatus::parse("MIGRATING"),
            DiskStatus::Unknown("MIGRATING".into())
        );
    }

    #[test]
    fn mountpoint_error_message() {
        let err = GceError::MountpointExists(PathBuf::from("/mnt/foo"));
        assert_eq!(err.to_string(), "error the mountpoint \"/mnt/foo\" already exists");
    }
}
