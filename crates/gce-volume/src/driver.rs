use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use gce_common::{DiskConfig, DiskProvider, GceError, HostFilesystem, PathKind, Result};

use crate::protocol::{Capabilities, Volume};

pub const DEFAULT_MOUNT_ROOT: &str = "/mnt/";

/// Docker volume plugin semantics on top of a [`DiskProvider`]: every
/// volume is a persistent disk mounted under `root`.
pub struct VolumeDriver {
    root: PathBuf,
    disks: Arc<dyn DiskProvider>,
    fs: Arc<dyn HostFilesystem>,
}

impl VolumeDriver {
    pub fn new(
        root: impl Into<PathBuf>,
        disks: Arc<dyn DiskProvider>,
        fs: Arc<dyn HostFilesystem>,
    ) -> Self {
        Self {
            root: root.into(),
            disks,
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn config(&self, name: &str) -> Result<DiskConfig> {
        let config = DiskConfig::new(name);
        config.validate()?;
        Ok(config)
    }

    async fn create_mount_point(&self, target: &Path) -> Result<()> {
        match self.fs.path_kind(target).await? {
            None => self.fs.create_dir_all(target).await,
            Some(PathKind::Directory) => Ok(()),
            Some(_) => Err(GceError::MountpointExists(target.to_path_buf())),
        }
    }

    #[instrument(skip(self, options), fields(volume = %name))]
    pub async fn create(&self, name: &str, options: &HashMap<String, String>) -> Result<()> {
        info!("create request received");
        let config = DiskConfig::from_options(name, options)?;
        self.disks.create(&config).await
    }

    #[instrument(skip(self), fields(volume = %name))]
    pub async fn remove(&self, name: &str) -> Result<()> {
        info!("remove request received");
        let config = self.config(name)?;
        self.disks.delete(&config).await
    }

    /// Attaches, formats if blank and mounts the volume's disk.
    #[instrument(skip(self), fields(volume = %name))]
    pub async fn mount(&self, name: &str) -> Result<PathBuf> {
        info!("mount request received");
        let config = self.config(name)?;
        let target = config.mount_point(&self.root);

        self.create_mount_point(&target).await?;
        self.disks.attach(&config).await?;

        let device = config.device_path();
        self.fs.format(&device).await?;
        self.fs.mount(&device, &target).await?;

        info!(mountpoint = %target.display(), "volume mounted");
        Ok(target)
    }

    #[instrument(skip(self), fields(volume = %name))]
    pub async fn unmount(&self, name: &str) -> Result<()> {
        info!("unmount request received");
        let config = self.config(name)?;

        self.fs.unmount(&config.mount_point(&self.root)).await?;
        self.disks.detach(&config).await
    }

    pub async fn path(&self, name: &str) -> Result<PathBuf> {
        let config = self.config(name)?;
        let mountpoint = config.mount_point(&self.root);
        debug!(volume = %name, mountpoint = %mountpoint.display(), "path request received");
        Ok(mountpoint)
    }

    pub async fn get(&self, name: &str) -> Result<Volume> {
        let config = self.config(name)?;
        let found = self
            .disks
            .list()
            .await?
            .into_iter()
            .any(|d| d.is_ready() && d.name == config.name);

        if !found {
            return Err(GceError::NotFound(format!("volume {name:?}")));
        }
        Ok(Volume {
            mountpoint: config.mount_point(&self.root).display().to_string(),
            name: config.name,
        })
    }

    pub async fn list(&self) -> Result<Vec<Volume>> {
        debug!("list request received");
        Ok(self
            .disks
            .list()
            .await?
            .into_iter()
            .filter(|d| d.is_ready())
            .map(|d| Volume {
                name: d.name,
                mountpoint: String::new(),
            })
            .collect())
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}
