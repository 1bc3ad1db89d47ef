use async_trait::async_trait;

use gce_common::Result;

use crate::types::{
    Address, AttachedDisk, Disk, Firewall, ForwardingRule, Instance, Operation, Tags, TargetPool,
    TargetPoolsAddInstanceRequest, Zone,
};

/// The Compute Engine v1 calls the reconcilers rely on.
///
/// Lookups of a missing resource fail with `GceError::NotFound`; every
/// mutating call returns the operation to wait on.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn get_zone(&self, project: &str, zone: &str) -> Result<Zone>;

    // Disks
    async fn get_disk(&self, project: &str, zone: &str, disk: &str) -> Result<Disk>;
    async fn insert_disk(&self, project: &str, zone: &str, disk: &Disk) -> Result<Operation>;
    async fn delete_disk(&self, project: &str, zone: &str, disk: &str) -> Result<Operation>;
    async fn list_disks(&self, project: &str, zone: &str) -> Result<Vec<Disk>>;

    // Instances
    async fn get_instance(&self, project: &str, zone: &str, instance: &str) -> Result<Instance>;
    async fn attach_disk(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        disk: &AttachedDisk,
    ) -> Result<Operation>;
    async fn detach_disk(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        device_name: &str,
    ) -> Result<Operation>;
    async fn set_tags(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        tags: &Tags,
    ) -> Result<Operation>;

    // Target pools
    async fn get_target_pool(&self, project: &str, region: &str, pool: &str)
        -> Result<TargetPool>;
    async fn insert_target_pool(
        &self,
        project: &str,
        region: &str,
        pool: &TargetPool,
    ) -> Result<Operation>;
    async fn add_target_pool_instance(
        &self,
        project: &str,
        region: &str,
        pool: &str,
        request: &TargetPoolsAddInstanceRequest,
    ) -> Result<Operation>;
    async fn delete_target_pool(&self, project: &str, region: &str, pool: &str)
        -> Result<Operation>;

    // Forwarding rules
    async fn get_forwarding_rule(
        &self,
        project: &str,
        region: &str,
        rule: &str,
    ) -> Result<ForwardingRule>;
    async fn insert_forwarding_rule(
        &self,
        project: &str,
        region: &str,
        rule: &ForwardingRule,
    ) -> Result<Operation>;
    async fn delete_forwarding_rule(
        &self,
        project: &str,
        region: &str,
        rule: &str,
    ) -> Result<Operation>;

    // Firewalls
    async fn get_firewall(&self, project: &str, firewall: &str) -> Result<Firewall>;
    async fn insert_firewall(&self, project: &str, firewall: &Firewall) -> Result<Operation>;
    async fn update_firewall(&self, project: &str, firewall: &Firewall) -> Result<Operation>;
    async fn delete_firewall(&self, project: &str, firewall: &str) -> Result<Operation>;

    async fn get_address(&self, project: &str, region: &str, address: &str) -> Result<Address>;

    // Operations
    async fn get_zone_operation(&self, project: &str, zone: &str, operation: &str)
        -> Result<Operation>;
    async fn get_region_operation(
        &self,
        project: &str,
        region: &str,
        operation: &str,
    ) -> Result<Operation>;
    async fn get_global_operation(&self, project: &str, operation: &str) -> Result<Operation>;
}
