use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use gce_common::{
    naming, DiskConfig, DiskProvider, DiskStatus, DiskSummary, GceError, HostFilesystem, Result,
};

use crate::client::ComputeClient;
use crate::device::{wait_for_device, DeviceWaitConfig};
use crate::types::{AttachedDisk, Disk};

/// Persistent disk lifecycle for the local instance.
#[derive(Clone)]
pub struct DiskReconciler {
    client: ComputeClient,
    fs: Arc<dyn HostFilesystem>,
    device_wait: DeviceWaitConfig,
}

impl DiskReconciler {
    pub fn new(client: ComputeClient, fs: Arc<dyn HostFilesystem>) -> Self {
        Self {
            client,
            fs,
            device_wait: DeviceWaitConfig::default(),
        }
    }

    pub fn with_device_wait(mut self, device_wait: DeviceWaitConfig) -> Self {
        self.device_wait = device_wait;
        self
    }

    fn disk(&self, config: &DiskConfig) -> Disk {
        Disk {
            name: config.name.clone(),
            disk_type: Some(naming::disk_type_url(
                self.client.project(),
                self.client.zone(),
                config.disk_type.as_deref().unwrap_or_default(),
            )),
            size_gb: config.size_gb.map(|s| s.to_string()),
            source_snapshot: config.source_snapshot.clone().filter(|s| !s.is_empty()),
            source_image: config.source_image.clone().filter(|s| !s.is_empty()),
            ..Default::default()
        }
    }

    /// The instance's attachment record for disk `name`, matched on the
    /// source URL suffix.
    pub async fn attached_disk(&self, name: &str) -> Result<Option<AttachedDisk>> {
        let client = &self.client;
        let instance = client
            .api()
            .get_instance(client.project(), client.zone(), client.instance())
            .await?;

        let suffix = naming::disk_source_suffix(client.project(), client.zone(), name);
        Ok(instance
            .disks
            .into_iter()
            .find(|d| d.source.as_deref().is_some_and(|s| s.ends_with(&suffix))))
    }
}

#[async_trait]
impl DiskProvider for DiskReconciler {
    #[instrument(skip(self, config), fields(volume = %config.name))]
    async fn create(&self, config: &DiskConfig) -> Result<()> {
        config.validate()?;
        let client = &self.client;

        match client
            .api()
            .get_disk(client.project(), client.zone(), &config.name)
            .await
        {
            Ok(_) => {
                debug!("disk already exists");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let op = client
                    .api()
                    .insert_disk(client.project(), client.zone(), &self.disk(config))
                    .await?;
                client.wait_done(&op).await?;
                info!("disk created");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, config), fields(volume = %config.name))]
    async fn attach(&self, config: &DiskConfig) -> Result<()> {
        let client = &self.client;

        if self.attached_disk(&config.name).await?.is_some() {
            debug!("disk already attached");
        } else {
            let attached = AttachedDisk {
                source: Some(naming::disk_url(
                    client.project(),
                    client.zone(),
                    &config.name,
                )),
                device_name: Some(config.device_name()),
                ..Default::default()
            };
            let op = client
                .api()
                .attach_disk(client.project(), client.zone(), client.instance(), &attached)
                .await?;
            client.wait_done(&op).await?;
            info!(device = %config.device_name(), "disk attached");
        }

        wait_for_device(
            self.fs.as_ref(),
            &config.device_path(),
            true,
            &self.device_wait,
        )
        .await
    }

    #[instrument(skip(self, config), fields(volume = %config.name))]
    async fn detach(&self, config: &DiskConfig) -> Result<()> {
        let client = &self.client;

        let device_name = self
            .attached_disk(&config.name)
            .await?
            .and_then(|d| d.device_name)
            .ok_or_else(|| GceError::NotAttached {
                volume: config.name.clone(),
                instance: client.instance().to_string(),
            })?;

        let op = client
            .api()
            .detach_disk(client.project(), client.zone(), client.instance(), &device_name)
            .await?;
        client.wait_done(&op).await?;
        info!(device = %device_name, "disk detached");

        wait_for_device(
            self.fs.as_ref(),
            &naming::device_path(&device_name),
            false,
            &self.device_wait,
        )
        .await
    }

    #[instrument(skip(self, config), fields(volume = %config.name))]
    async fn delete(&self, config: &DiskConfig) -> Result<()> {
        let client = &self.client;
        let op = client
            .api()
            .delete_disk(client.project(), client.zone(), &config.name)
            .await?;
        client.wait_done(&op).await?;
        info!("disk deleted");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DiskSummary>> {
        let client = &self.client;
        let disks = client
            .api()
            .list_disks(client.project(), client.zone())
            .await?;

        Ok(disks
            .into_iter()
            .map(|d| DiskSummary {
                status: DiskStatus::parse(d.status.as_deref().unwrap_or_default()),
                size_gb: d.size_gb.as_deref().and_then(|s| s.parse().ok()),
                name: d.name,
            })
            .collect())
    }
}
