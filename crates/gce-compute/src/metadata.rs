//! Access to the GCE metadata server: who we are and how to authenticate.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use gce_common::naming::last_segment;
use gce_common::{GceError, Result};

use crate::rest::{api_error, transport_error};

pub const METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1";
const METADATA_FLAVOR: &str = "Metadata-Flavor";

/// OAuth token as served by `instance/service-accounts/default/token`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: String,
}

#[derive(Debug, Clone)]
pub struct MetadataClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for MetadataClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataClient {
    pub fn new() -> Self {
        Self::with_base_url(METADATA_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, path))
            .header(METADATA_FLAVOR, "Google")
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(api_error(response, path).await);
        }
        Ok(response)
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let text = self.get(path).await?.text().await.map_err(transport_error)?;
        Ok(text.trim().to_string())
    }

    /// True when the metadata server answers as Google's.
    pub async fn on_gce(&self) -> bool {
        let response = self
            .http
            .get(format!("{}/", self.base_url))
            .header(METADATA_FLAVOR, "Google")
            .timeout(Duration::from_secs(2))
            .send()
            .await;

        match response {
            Ok(response) => response
                .headers()
                .get(METADATA_FLAVOR)
                .is_some_and(|v| v == "Google"),
            Err(e) => {
                debug!(error = %e, "metadata server unreachable");
                false
            }
        }
    }

    pub async fn project_id(&self) -> Result<String> {
        self.get_text("project/project-id").await
    }

    /// Zone name, from `projects/<number>/zones/<zone>`.
    pub async fn zone(&self) -> Result<String> {
        let zone = self.get_text("instance/zone").await?;
        Ok(last_segment(&zone).to_string())
    }

    pub async fn instance_name(&self) -> Result<String> {
        self.get_text("instance/name").await
    }

    pub async fn access_token(&self) -> Result<AccessToken> {
        self.get("instance/service-accounts/default/token")
            .await?
            .json()
            .await
            .map_err(transport_error)
    }
}

/// The project, zone and instance this daemon manages resources for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub project: String,
    pub zone: String,
    pub instance: String,
}

impl HostIdentity {
    pub fn new(
        project: impl Into<String>,
        zone: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            instance: instance.into(),
        }
    }

    pub async fn from_metadata(metadata: &MetadataClient) -> Result<Self> {
        let identity = Self {
            project: metadata.project_id().await?,
            zone: metadata.zone().await?,
            instance: metadata.instance_name().await?,
        };
        if identity.project.is_empty() || identity.zone.is_empty() || identity.instance.is_empty()
        {
            return Err(GceError::Validation(format!(
                "incomplete host identity from metadata server: {identity:?}"
            )));
        }
        Ok(identity)
    }
}
