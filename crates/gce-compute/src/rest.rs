//! `ComputeApi` over the Compute Engine v1 REST endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::trace;

use gce_common::{GceError, Result};

use crate::api::ComputeApi;
use crate::auth::TokenSource;
use crate::types::{
    Address, AttachedDisk, Disk, DiskList, Firewall, ForwardingRule, Instance, Operation, Tags,
    TargetPool, TargetPoolsAddInstanceRequest, Zone,
};

pub const COMPUTE_API_URL: &str = "https://compute.googleapis.com/compute/v1";

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

pub(crate) fn transport_error(e: reqwest::Error) -> GceError {
    GceError::Transport(e.to_string())
}

/// Maps a non-2xx response to `NotFound` (404) or `Api`, preferring the
/// message from Google's error envelope.
pub(crate) async fn api_error(response: reqwest::Response, resource: &str) -> GceError {
    let code = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorEnvelope>(&text) {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
        _ => text,
    };

    if code == 404 {
        GceError::NotFound(resource.to_string())
    } else {
        GceError::Api { code, message }
    }
}

pub struct RestCompute {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl RestCompute {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self::with_base_url(COMPUTE_API_URL, tokens)
    }

    pub fn with_base_url(base_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.tokens.token().await?;
        Ok(self
            .http
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, path: &str) -> Result<T> {
        let response = request.send().await.map_err(transport_error)?;
        trace!(%path, status = %response.status(), "compute api response");
        if !response.status().is_success() {
            return Err(api_error(response, path).await);
        }
        response.json().await.map_err(transport_error)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.request(Method::GET, path).await?;
        self.send(request, path).await
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Operation> {
        let request = self.request(Method::POST, path).await?.json(body);
        self.send(request, path).await
    }

    async fn put<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Operation> {
        let request = self.request(Method::PUT, path).await?.json(body);
        self.send(request, path).await
    }

    async fn delete(&self, path: &str) -> Result<Operation> {
        let request = self.request(Method::DELETE, path).await?;
        self.send(request, path).await
    }
}

fn zonal(project: &str, zone: &str, rest: &str) -> String {
    format!("projects/{project}/zones/{zone}/{rest}")
}

fn regional(project: &str, region: &str, rest: &str) -> String {
    format!("projects/{project}/regions/{region}/{rest}")
}

fn global(project: &str, rest: &str) -> String {
    format!("projects/{project}/global/{rest}")
}

#[async_trait]
impl ComputeApi for RestCompute {
    async fn get_zone(&self, project: &str, zone: &str) -> Result<Zone> {
        self.get(&format!("projects/{project}/zones/{zone}")).await
    }

    async fn get_disk(&self, project: &str, zone: &str, disk: &str) -> Result<Disk> {
        self.get(&zonal(project, zone, &format!("disks/{disk}"))).await
    }

    async fn insert_disk(&self, project: &str, zone: &str, disk: &Disk) -> Result<Operation> {
        self.post(&zonal(project, zone, "disks"), disk).await
    }

    async fn delete_disk(&self, project: &str, zone: &str, disk: &str) -> Result<Operation> {
        self.delete(&zonal(project, zone, &format!("disks/{disk}"))).await
    }

    async fn list_disks(&self, project: &str, zone: &str) -> Result<Vec<Disk>> {
        let path = zonal(project, zone, "disks");
        let mut disks = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.request(Method::GET, &path).await?;
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: DiskList = self.send(request, &path).await?;
            disks.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(disks)
    }

    async fn get_instance(&self, project: &str, zone: &str, instance: &str) -> Result<Instance> {
        self.get(&zonal(project, zone, &format!("instances/{instance}")))
            .await
    }

    async fn attach_disk(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        disk: &AttachedDisk,
    ) -> Result<Operation> {
        let path = zonal(project, zone, &format!("instances/{instance}/attachDisk"));
        self.post(&path, disk).await
    }

    async fn detach_disk(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        device_name: &str,
    ) -> Result<Operation> {
        let path = zonal(project, zone, &format!("instances/{instance}/detachDisk"));
        let request = self
            .request(Method::POST, &path)
            .await?
            .query(&[("deviceName", device_name)])
            .json(&serde_json::json!({}));
        self.send(request, &path).await
    }

    async fn set_tags(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        tags: &Tags,
    ) -> Result<Operation> {
        let path = zonal(project, zone, &format!("instances/{instance}/setTags"));
        self.post(&path, tags).await
    }

    async fn get_target_pool(
        &self,
        project: &str,
        region: &str,
        pool: &str,
    ) -> Result<TargetPool> {
        self.get(&regional(project, region, &format!("targetPools/{pool}")))
            .await
    }

    async fn insert_target_pool(
        &self,
        project: &str,
        region: &str,
        pool: &TargetPool,
    ) -> Result<Operation> {
        self.post(&regional(project, region, "targetPools"), pool)
            .await
    }

    async fn add_target_pool_instance(
        &self,
        project: &str,
        region: &str,
        pool: &str,
        request: &TargetPoolsAddInstanceRequest,
    ) -> Result<Operation> {
        let path = regional(project, region, &format!("targetPools/{pool}/addInstance"));
        self.post(&path, request).await
    }

    async fn delete_target_pool(
        &self,
        project: &str,
        region: &str,
        pool: &str,
    ) -> Result<Operation> {
        self.delete(&regional(project, region, &format!("targetPools/{pool}")))
            .await
    }

    async fn get_forwarding_rule(
        &self,
        project: &str,
        region: &str,
        rule: &str,
    ) -> Result<ForwardingRule> {
        self.get(&regional(project, region, &format!("forwardingRules/{rule}")))
            .await
    }

    async fn insert_forwarding_rule(
        &self,
        project: &str,
        region: &str,
        rule: &ForwardingRule,
    ) -> Result<Operation> {
        self.post(&regional(project, region, "forwardingRules"), rule)
            .await
    }

    async fn delete_forwarding_rule(
        &self,
        project: &str,
        region: &str,
        rule: &str,
    ) -> Result<Operation> {
        self.delete(&regional(project, region, &format!("forwardingRules/{rule}")))
            .await
    }

    async fn get_firewall(&self, project: &str, firewall: &str) -> Result<Firewall> {
        self.get(&global(project, &format!("firewalls/{firewall}")))
            .await
    }

    async fn insert_firewall(&self, project: &str, firewall: &Firewall) -> Result<Operation> {
        self.post(&global(project, "firewalls"), firewall).await
    }

    async fn update_firewall(&self, project: &str, firewall: &Firewall) -> Result<Operation> {
        let path = global(project, &format!("firewalls/{}", firewall.name));
        self.put(&path, firewall).await
    }

    async fn delete_firewall(&self, project: &str, firewall: &str) -> Result<Operation> {
        self.delete(&global(project, &format!("firewalls/{firewall}")))
            .await
    }

    async fn get_address(&self, project: &str, region: &str, address: &str) -> Result<Address> {
        self.get(&regional(project, region, &format!("addresses/{address}")))
            .await
    }

    async fn get_zone_operation(
        &self,
        project: &str,
        zone: &str,
        operation: &str,
    ) -> Result<Operation> {
        self.get(&zonal(project, zone, &format!("operations/{operation}")))
            .await
    }

    async fn get_region_operation(
        &self,
        project: &str,
        region: &str,
        operation: &str,
    ) -> Result<Operation> {
        self.get(&regional(project, region, &format!("operations/{operation}")))
            .await
    }

    async fn get_global_operation(&self, project: &str, operation: &str) -> Result<Operation> {
        self.get(&global(project, &format!("operations/{operation}")))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_paths() {
        assert_eq!(zonal("p", "z", "disks/d"), "projects/p/zones/z/disks/d");
        assert_eq!(
            regional("p", "r", "targetPools"),
            "projects/p/regions/r/targetPools"
        );
        assert_eq!(global("p", "firewalls/f"), "projects/p/global/firewalls/f");
    }

    #[test]
    fn error_envelope_decodes() {
        let envelope: ErrorEnvelope = serde_json::from_str(
            r#"{"error":{"code":403,"message":"Required 'compute.disks.create' permission","errors":[]}}"#,
        )
        .unwrap();
        assert_eq!(
            envelope.error.message,
            "Required 'compute.disks.create' permission"
        );
    }
}
