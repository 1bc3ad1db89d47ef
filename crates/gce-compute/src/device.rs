use std::path::Path;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use gce_common::{GceError, HostFilesystem, Result};

/// Bounds the wait for a device node after attach or detach.
#[derive(Debug, Clone)]
pub struct DeviceWaitConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for DeviceWaitConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Polls until `device` exists (`present`) or is gone (`!present`).
pub async fn wait_for_device(
    fs: &dyn HostFilesystem,
    device: &Path,
    present: bool,
    config: &DeviceWaitConfig,
) -> Result<()> {
    let poll = async {
        loop {
            match fs.path_kind(device).await {
                Ok(kind) if kind.is_some() == present => return,
                Ok(_) => {}
                Err(e) => warn!(device = %device.display(), error = %e, "device probe failed"),
            }
            sleep(config.interval).await;
        }
    };

    timeout(config.timeout, poll).await.map_err(|_| {
        GceError::Timeout(format!(
            "device {} still {} after {:?}",
            device.display(),
            if present { "missing" } else { "present" },
            config.timeout
        ))
    })?;

    debug!(device = %device.display(), present, "device settled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gce_common::testing::MemFilesystem;

    #[tokio::test(start_paused = true)]
    async fn waits_for_device_to_appear() {
        let fs = MemFilesystem::new();
        let dev = Path::new("/dev/disk/by-id/google-docker-volume-foo");

        let appear = {
            let fs = fs.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(2)).await;
                fs.add_device("/dev/disk/by-id/google-docker-volume-foo");
            })
        };

        wait_for_device(&fs, dev, true, &DeviceWaitConfig::default())
            .await
            .unwrap();
        appear.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_device_times_out() {
        let fs = MemFilesystem::new();
        let err = wait_for_device(
            &fs,
            Path::new("/dev/disk/by-id/google-docker-volume-nope"),
            true,
            &DeviceWaitConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GceError::Timeout(_)));
    }
}
