use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use gce_common::{naming, NetworkConfig, NetworkProvider, Result};

use crate::client::ComputeClient;
use crate::types::{
    Firewall, FirewallAllowed, ForwardingRule, InstanceReference, Operation, Tags, TargetPool,
    TargetPoolsAddInstanceRequest,
};

/// Converges the target pool, forwarding rules, firewall and instance tag
/// that expose a container's published ports.
#[derive(Clone)]
pub struct NetworkReconciler {
    client: ComputeClient,
}

/// Treats a missing resource as already deleted.
fn tolerate_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

impl NetworkReconciler {
    pub fn new(client: ComputeClient) -> Self {
        Self { client }
    }

    fn target_pool(&self, config: &NetworkConfig) -> TargetPool {
        TargetPool {
            name: config.name(self.client.instance()),
            instances: vec![self.client.instance_url()],
            session_affinity: config.session_affinity.map(|a| a.as_str().to_string()),
            self_link: None,
        }
    }

    fn forwarding_rules(&self, config: &NetworkConfig) -> Vec<ForwardingRule> {
        let instance = self.client.instance();
        let target = naming::target_pool_url(
            self.client.project(),
            self.client.region(),
            &config.name(instance),
        );

        config
            .ports
            .iter()
            .map(|port| ForwardingRule {
                name: config.forwarding_rule_name(instance, port),
                ip_address: Some(config.address.clone()).filter(|a| !a.is_empty()),
                ip_protocol: Some(port.protocol.as_ip_protocol().to_string()),
                port_range: Some(port.port.to_string()),
                target: Some(target.clone()),
            })
            .collect()
    }

    fn firewall(&self, config: &NetworkConfig) -> Firewall {
        let name = config.name(self.client.instance());
        Firewall {
            network: Some(config.network().to_string()),
            source_ranges: config.source_ranges(),
            source_tags: config.source.tags.clone(),
            target_tags: vec![name.clone()],
            allowed: config
                .ports
                .iter()
                .map(|port| FirewallAllowed {
                    ip_protocol: port.protocol.as_str().to_string(),
                    ports: vec![port.port.to_string()],
                })
                .collect(),
            name,
        }
    }

    async fn wait(&self, op: Operation) -> Result<()> {
        self.client.wait_done(&op).await
    }

    async fn update_instance_tags(&self, config: &NetworkConfig) -> Result<()> {
        let client = &self.client;
        let instance = client
            .api()
            .get_instance(client.project(), client.zone(), client.instance())
            .await?;

        let tag = config.name(client.instance());
        if instance.tags.items.contains(&tag) {
            return Ok(());
        }

        let mut items = instance.tags.items;
        items.push(tag);
        let tags = Tags {
            items,
            fingerprint: instance.tags.fingerprint,
        };
        let op = client
            .api()
            .set_tags(client.project(), client.zone(), client.instance(), &tags)
            .await?;
        self.wait(op).await
    }

    async fn create_or_update_target_pool(&self, config: &NetworkConfig) -> Result<()> {
        let client = &self.client;
        let pool = self.target_pool(config);

        let existing = match client
            .api()
            .get_target_pool(client.project(), client.region(), &pool.name)
            .await
        {
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => {
                let op = client
                    .api()
                    .insert_target_pool(client.project(), client.region(), &pool)
                    .await?;
                self.wait(op).await?;
                info!(pool = %pool.name, "target pool created");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let suffix = format!(
            "projects/{}/zones/{}/instances/{}",
            client.project(),
            client.zone(),
            client.instance()
        );
        if existing.instances.iter().any(|i| i.ends_with(&suffix)) {
            debug!(pool = %pool.name, "instance already in target pool");
            return Ok(());
        }

        let request = TargetPoolsAddInstanceRequest {
            instances: vec![InstanceReference {
                instance: client.instance_url(),
            }],
        };
        let op = client
            .api()
            .add_target_pool_instance(client.project(), client.region(), &pool.name, &request)
            .await?;
        self.wait(op).await?;
        info!(pool = %pool.name, "instance added to target pool");
        Ok(())
    }

    async fn create_forwarding_rules(&self, config: &NetworkConfig) -> Result<()> {
        let client = &self.client;

        let address = if config.address_needs_lookup() {
            let reserved = client
                .api()
                .get_address(client.project(), client.region(), &config.address)
                .await?;
            Some(reserved.address)
        } else {
            None
        };

        for mut rule in self.forwarding_rules(config) {
            if let Some(address) = &address {
                rule.ip_address = Some(address.clone());
            }

            match client
                .api()
                .get_forwarding_rule(client.project(), client.region(), &rule.name)
                .await
            {
                Ok(_) => {
                    debug!(rule = %rule.name, "forwarding rule already exists");
                    continue;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }

            let op = client
                .api()
                .insert_forwarding_rule(client.project(), client.region(), &rule)
                .await?;
            self.wait(op).await?;
            info!(rule = %rule.name, "forwarding rule created");
        }

        Ok(())
    }

    async fn create_or_update_firewall(&self, config: &NetworkConfig) -> Result<()> {
        let client = &self.client;
        let desired = self.firewall(config);

        match client.api().get_firewall(client.project(), &desired.name).await {
            Ok(existing) if existing.same_rules(&desired) => {
                debug!(firewall = %desired.name, "firewall up to date");
                Ok(())
            }
            Ok(_) => {
                let op = client
                    .api()
                    .update_firewall(client.project(), &desired)
                    .await?;
                self.wait(op).await?;
                info!(firewall = %desired.name, "firewall updated");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let op = client
                    .api()
                    .insert_firewall(client.project(), &desired)
                    .await?;
                self.wait(op).await?;
                info!(firewall = %desired.name, "firewall created");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_firewall(&self, config: &NetworkConfig) -> Result<()> {
        let client = &self.client;
        let name = config.name(client.instance());
        let op = client.api().delete_firewall(client.project(), &name).await?;
        self.wait(op).await
    }

    async fn delete_forwarding_rule(&self, rule: &ForwardingRule) -> Result<()> {
        let client = &self.client;
        let op = client
            .api()
            .delete_forwarding_rule(client.project(), client.region(), &rule.name)
            .await?;
        self.wait(op).await
    }

    async fn delete_target_pool(&self, config: &NetworkConfig) -> Result<()> {
        let client = &self.client;
        let name = config.name(client.instance());
        let op = client
            .api()
            .delete_target_pool(client.project(), client.region(), &name)
            .await?;
        self.wait(op).await
    }
}

#[async_trait]
impl NetworkProvider for NetworkReconciler {
    #[instrument(skip(self, config), fields(container = %config.container, network = %config.name(self.client.instance())))]
    async fn create(&self, config: &NetworkConfig) -> Result<()> {
        config.validate()?;

        if let Err(e) = self.update_instance_tags(config).await {
            warn!(error = %e, "failed to tag instance, continuing");
        }

        self.create_or_update_target_pool(config).await?;
        self.create_forwarding_rules(config).await?;
        self.create_or_update_firewall(config).await?;

        info!("network converged");
        Ok(())
    }

    #[instrument(skip(self, config), fields(container = %config.container, network = %config.name(self.client.instance())))]
    async fn delete(&self, config: &NetworkConfig) -> Result<()> {
        tolerate_not_found(self.delete_firewall(config).await)?;
        for rule in self.forwarding_rules(config) {
            tolerate_not_found(self.delete_forwarding_rule(&rule).await)?;
        }
        tolerate_not_found(self.delete_target_pool(config).await)?;

        info!("network removed");
        Ok(())
    }
}
