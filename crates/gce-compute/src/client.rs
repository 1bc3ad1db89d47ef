use std::sync::Arc;

use tracing::info;

use gce_common::{naming, Result};

use crate::api::ComputeApi;
use crate::metadata::HostIdentity;
use crate::operation::{OperationPoller, PollerConfig};
use crate::types::Operation;

/// API handle bound to this instance's project, zone and region.
///
/// Shared by the disk and network reconcilers.
#[derive(Clone)]
pub struct ComputeClient {
    api: Arc<dyn ComputeApi>,
    identity: HostIdentity,
    region: String,
    poller: OperationPoller,
}

impl ComputeClient {
    /// Resolves the region from the zone and builds the client.
    pub async fn connect(
        api: Arc<dyn ComputeApi>,
        identity: HostIdentity,
        poller: PollerConfig,
    ) -> Result<Self> {
        let zone = api.get_zone(&identity.project, &identity.zone).await?;
        let region = zone.region_name().to_string();
        info!(
            project = %identity.project,
            zone = %identity.zone,
            %region,
            instance = %identity.instance,
            "compute client ready"
        );

        Ok(Self {
            poller: OperationPoller::new(api.clone(), identity.project.clone(), poller),
            api,
            identity,
            region,
        })
    }

    pub fn api(&self) -> &dyn ComputeApi {
        self.api.as_ref()
    }

    pub fn project(&self) -> &str {
        &self.identity.project
    }

    pub fn zone(&self) -> &str {
        &self.identity.zone
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn instance(&self) -> &str {
        &self.identity.instance
    }

    pub fn instance_url(&self) -> String {
        naming::instance_url(self.project(), self.zone(), self.instance())
    }

    pub async fn wait_done(&self, op: &Operation) -> Result<()> {
        self.poller.wait_done(op).await
    }
}
