use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use gce_common::{GceError, Result};

use crate::api::ComputeApi;
use crate::types::{Operation, OperationScope};

/// How often and for how long an operation is polled.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Waits for asynchronous Compute operations to reach `DONE`.
#[derive(Clone)]
pub struct OperationPoller {
    api: Arc<dyn ComputeApi>,
    project: String,
    config: PollerConfig,
}

impl OperationPoller {
    pub fn new(api: Arc<dyn ComputeApi>, project: impl Into<String>, config: PollerConfig) -> Self {
        Self {
            api,
            project: project.into(),
            config,
        }
    }

    async fn fetch(&self, op: &Operation) -> Result<Operation> {
        match op.scope() {
            OperationScope::Region(region) => {
                self.api
                    .get_region_operation(&self.project, &region, &op.name)
                    .await
            }
            OperationScope::Zone(zone) => {
                self.api
                    .get_zone_operation(&self.project, &zone, &op.name)
                    .await
            }
            OperationScope::Global => self.api.get_global_operation(&self.project, &op.name).await,
        }
    }

    /// Polls `op` until it is `DONE`.
    ///
    /// Fails with `Timeout` when the deadline passes first and with
    /// `OperationFailed` when the operation finished with errors. Errors
    /// while polling are retried until the deadline.
    pub async fn wait_done(&self, op: &Operation) -> Result<()> {
        let poll = async {
            let mut current = op.clone();
            loop {
                if current.is_done() {
                    return current;
                }
                sleep(self.config.interval).await;

                match self.fetch(op).await {
                    Ok(next) => current = next,
                    Err(e) => warn!(operation = %op.name, error = %e, "polling operation failed, retrying"),
                }
            }
        };

        let done = timeout(self.config.timeout, poll).await.map_err(|_| {
            GceError::Timeout(format!(
                "operation {} not done after {:?}",
                op.name, self.config.timeout
            ))
        })?;

        if let Some(error) = done.error.as_ref().filter(|e| !e.errors.is_empty()) {
            return Err(GceError::OperationFailed {
                name: done.name.clone(),
                message: error.message(),
            });
        }

        debug!(operation = %done.name, "operation done");
        Ok(())
    }
}
