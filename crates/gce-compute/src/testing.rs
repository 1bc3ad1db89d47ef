//! `FakeCompute`: an in-memory Compute API with a call log.
//!
//! Mutations apply at call time. Operations come back `DONE` unless
//! [`FakeCompute::set_polls_until_done`] asks for pending ones.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use gce_common::naming;
use gce_common::testing::MemFilesystem;
use gce_common::{GceError, Result};

use crate::api::ComputeApi;
use crate::metadata::HostIdentity;
use crate::types::{
    Address, AttachedDisk, Disk, Firewall, ForwardingRule, Instance, Operation, OperationStatus,
    Tags, TargetPool, TargetPoolsAddInstanceRequest, Zone,
};

#[derive(Default)]
struct State {
    disks: BTreeMap<String, Disk>,
    instance: Instance,
    target_pools: BTreeMap<String, TargetPool>,
    forwarding_rules: BTreeMap<String, ForwardingRule>,
    firewalls: BTreeMap<String, Firewall>,
    addresses: BTreeMap<String, Address>,
    pending: HashMap<String, (Operation, u32)>,
    polls_until_done: u32,
    operation_polls: usize,
    next_operation: u64,
    failures: HashMap<String, u16>,
    failures_left: HashMap<String, u32>,
    calls: Vec<String>,
}

pub struct FakeCompute {
    project: String,
    zone: String,
    region: String,
    state: Mutex<State>,
    devices: Option<MemFilesystem>,
}

impl FakeCompute {
    pub fn new(project: &str, zone: &str, instance: &str) -> Self {
        let region = zone.rsplit_once('-').map_or(zone, |(r, _)| r).to_string();
        let state = State {
            instance: Instance {
                name: instance.to_string(),
                tags: Tags {
                    items: vec![],
                    fingerprint: Some("fp-0".into()),
                },
                ..Default::default()
            },
            ..Default::default()
        };

        Self {
            project: project.to_string(),
            zone: zone.to_string(),
            region,
            state: Mutex::new(state),
            devices: None,
        }
    }

    /// Mirrors attach/detach as device nodes appearing in `fs`.
    pub fn with_devices(mut self, fs: MemFilesystem) -> Self {
        self.devices = Some(fs);
        self
    }

    pub fn identity(&self) -> HostIdentity {
        HostIdentity::new(&self.project, &self.zone, self.lock().instance.name.clone())
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every API call so far, as `method name`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Calls whose method starts with `prefix`.
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Makes every later call to `method` fail with HTTP `code`.
    pub fn fail(&self, method: &str, code: u16) {
        let mut state = self.lock();
        state.failures_left.remove(method);
        state.failures.insert(method.to_string(), code);
    }

    /// Makes the next `times` calls to `method` fail with HTTP `code`.
    pub fn fail_times(&self, method: &str, code: u16, times: u32) {
        if times == 0 {
            return;
        }
        let mut state = self.lock();
        state.failures.insert(method.to_string(), code);
        state.failures_left.insert(method.to_string(), times);
    }

    pub fn set_polls_until_done(&self, polls: u32) {
        self.lock().polls_until_done = polls;
    }

    pub fn operation_polls(&self) -> usize {
        self.lock().operation_polls
    }

    /// Registers a pending operation in the given scope.
    pub fn pending_operation(&self, name: &str, zone: Option<&str>, region: Option<&str>) -> Operation {
        let mut state = self.lock();
        let op = Operation {
            name: name.to_string(),
            zone: zone.map(String::from),
            region: region.map(String::from),
            status: Some(OperationStatus::Pending),
            ..Default::default()
        };
        let polls = state.polls_until_done;
        state.pending.insert(name.to_string(), (op.clone(), polls));
        op
    }

    pub fn insert_address(&self, name: &str, address: &str) {
        self.lock().addresses.insert(
            name.to_string(),
            Address {
                name: name.to_string(),
                address: address.to_string(),
                status: Some("RESERVED".into()),
            },
        );
    }

    pub fn put_disk(&self, disk: Disk) {
        self.lock().disks.insert(disk.name.clone(), disk);
    }

    pub fn disk(&self, name: &str) -> Option<Disk> {
        self.lock().disks.get(name).cloned()
    }

    pub fn disk_names(&self) -> Vec<String> {
        self.lock().disks.keys().cloned().collect()
    }

    pub fn instance(&self) -> Instance {
        self.lock().instance.clone()
    }

    pub fn target_pools(&self) -> Vec<TargetPool> {
        self.lock().target_pools.values().cloned().collect()
    }

    pub fn put_target_pool(&self, pool: TargetPool) {
        self.lock().target_pools.insert(pool.name.clone(), pool);
    }

    pub fn forwarding_rules(&self) -> Vec<ForwardingRule> {
        self.lock().forwarding_rules.values().cloned().collect()
    }

    pub fn firewalls(&self) -> Vec<Firewall> {
        self.lock().firewalls.values().cloned().collect()
    }

    pub fn put_firewall(&self, firewall: Firewall) {
        self.lock().firewalls.insert(firewall.name.clone(), firewall);
    }

    /// Logs the call and applies any injected failure.
    fn record(&self, state: &mut State, method: &str, target: &str) -> Result<()> {
        state.calls.push(format!("{method} {target}"));
        let Some(code) = state.failures.get(method).copied() else {
            return Ok(());
        };
        if let Some(left) = state.failures_left.get_mut(method) {
            *left -= 1;
            if *left == 0 {
                state.failures_left.remove(method);
                state.failures.remove(method);
            }
        }

        match code {
            404 => Err(GceError::NotFound(target.to_string())),
            code => Err(GceError::Api {
                code,
                message: format!("injected failure for {method}"),
            }),
        }
    }

    fn operation(&self, state: &mut State, zonal: bool, regional: bool) -> Operation {
        state.next_operation += 1;
        let op = Operation {
            name: format!("operation-{}", state.next_operation),
            zone: zonal.then(|| format!("projects/{}/zones/{}", self.project, self.zone)),
            region: regional.then(|| format!("projects/{}/regions/{}", self.project, self.region)),
            status: Some(OperationStatus::Done),
            ..Default::default()
        };

        if state.polls_until_done == 0 {
            return op;
        }
        let pending = Operation {
            status: Some(OperationStatus::Running),
            ..op
        };
        state
            .pending
            .insert(pending.name.clone(), (pending.clone(), state.polls_until_done));
        pending
    }

    fn zonal_op(&self, state: &mut State) -> Operation {
        self.operation(state, true, false)
    }

    fn regional_op(&self, state: &mut State) -> Operation {
        self.operation(state, false, true)
    }

    fn global_op(&self, state: &mut State) -> Operation {
        self.operation(state, false, false)
    }

    fn poll(&self, method: &str, operation: &str) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, method, operation)?;
        state.operation_polls += 1;

        let Some((op, remaining)) = state.pending.get_mut(operation) else {
            return Err(GceError::NotFound(format!("operations/{operation}")));
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            op.status = Some(OperationStatus::Done);
        }
        Ok(op.clone())
    }

    fn not_found<T>(what: &str, name: &str) -> Result<T> {
        Err(GceError::NotFound(format!("{what}/{name}")))
    }
}

#[async_trait]
impl ComputeApi for FakeCompute {
    async fn get_zone(&self, _project: &str, zone: &str) -> Result<Zone> {
        let mut state = self.lock();
        self.record(&mut state, "get_zone", zone)?;
        Ok(Zone {
            name: zone.to_string(),
            region: format!(
                "{}/projects/{}/regions/{}",
                naming::COMPUTE_URL,
                self.project,
                self.region
            ),
        })
    }

    async fn get_disk(&self, _project: &str, _zone: &str, disk: &str) -> Result<Disk> {
        let mut state = self.lock();
        self.record(&mut state, "get_disk", disk)?;
        match state.disks.get(disk) {
            Some(d) => Ok(d.clone()),
            None => Self::not_found("disks", disk),
        }
    }

    async fn insert_disk(&self, _project: &str, _zone: &str, disk: &Disk) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, "insert_disk", &disk.name)?;
        if state.disks.contains_key(&disk.name) {
            return Err(GceError::Api {
                code: 409,
                message: format!("The resource '{}' already exists", disk.name),
            });
        }
        let stored = Disk {
            status: Some("READY".into()),
            self_link: Some(naming::disk_url(&self.project, &self.zone, &disk.name)),
            ..disk.clone()
        };
        state.disks.insert(disk.name.clone(), stored);
        Ok(self.zonal_op(&mut state))
    }

    async fn delete_disk(&self, _project: &str, _zone: &str, disk: &str) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, "delete_disk", disk)?;
        if state.disks.remove(disk).is_none() {
            return Self::not_found("disks", disk);
        }
        Ok(self.zonal_op(&mut state))
    }

    async fn list_disks(&self, _project: &str, zone: &str) -> Result<Vec<Disk>> {
        let mut state = self.lock();
        self.record(&mut state, "list_disks", zone)?;
        Ok(state.disks.values().cloned().collect())
    }

    async fn get_instance(&self, _project: &str, _zone: &str, instance: &str) -> Result<Instance> {
        let mut state = self.lock();
        self.record(&mut state, "get_instance", instance)?;
        if state.instance.name != instance {
            return Self::not_found("instances", instance);
        }
        Ok(state.instance.clone())
    }

    async fn attach_disk(
        &self,
        _project: &str,
        _zone: &str,
        _instance: &str,
        disk: &AttachedDisk,
    ) -> Result<Operation> {
        let source = disk.source.clone().unwrap_or_default();
        let device_name = disk.device_name.clone().unwrap_or_default();

        let mut state = self.lock();
        self.record(&mut state, "attach_disk", &device_name)?;
        let name = naming::last_segment(&source).to_string();
        if !state.disks.contains_key(&name) {
            return Self::not_found("disks", &name);
        }
        if state
            .instance
            .disks
            .iter()
            .any(|d| d.device_name.as_deref() == Some(device_name.as_str()))
        {
            return Err(GceError::Api {
                code: 400,
                message: format!("The disk resource '{source}' is already being used"),
            });
        }
        state.instance.disks.push(AttachedDisk {
            source: Some(source),
            device_name: Some(device_name.clone()),
            mode: Some("READ_WRITE".into()),
            ..Default::default()
        });
        if let Some(fs) = &self.devices {
            fs.add_device(naming::device_path(&device_name));
        }
        Ok(self.zonal_op(&mut state))
    }

    async fn detach_disk(
        &self,
        _project: &str,
        _zone: &str,
        _instance: &str,
        device_name: &str,
    ) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, "detach_disk", device_name)?;
        let before = state.instance.disks.len();
        state
            .instance
            .disks
            .retain(|d| d.device_name.as_deref() != Some(device_name));
        if state.instance.disks.len() == before {
            return Err(GceError::Api {
                code: 400,
                message: format!("No attached disk found with device name '{device_name}'"),
            });
        }
        if let Some(fs) = &self.devices {
            fs.remove(&naming::device_path(device_name));
        }
        Ok(self.zonal_op(&mut state))
    }

    async fn set_tags(
        &self,
        _project: &str,
        _zone: &str,
        instance: &str,
        tags: &Tags,
    ) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, "set_tags", instance)?;
        if tags.fingerprint != state.instance.tags.fingerprint {
            return Err(GceError::Api {
                code: 412,
                message: "Supplied fingerprint does not match current metadata fingerprint".into(),
            });
        }
        let generation = state.next_operation + 1;
        state.instance.tags = Tags {
            items: tags.items.clone(),
            fingerprint: Some(format!("fp-{generation}")),
        };
        Ok(self.zonal_op(&mut state))
    }

    async fn get_target_pool(
        &self,
        _project: &str,
        _region: &str,
        pool: &str,
    ) -> Result<TargetPool> {
        let mut state = self.lock();
        self.record(&mut state, "get_target_pool", pool)?;
        match state.target_pools.get(pool) {
            Some(p) => Ok(p.clone()),
            None => Self::not_found("targetPools", pool),
        }
    }

    async fn insert_target_pool(
        &self,
        _project: &str,
        _region: &str,
        pool: &TargetPool,
    ) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, "insert_target_pool", &pool.name)?;
        state.target_pools.insert(pool.name.clone(), pool.clone());
        Ok(self.regional_op(&mut state))
    }

    async fn add_target_pool_instance(
        &self,
        _project: &str,
        _region: &str,
        pool: &str,
        request: &TargetPoolsAddInstanceRequest,
    ) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, "add_target_pool_instance", pool)?;
        let Some(existing) = state.target_pools.get_mut(pool) else {
            return Self::not_found("targetPools", pool);
        };
        existing
            .instances
            .extend(request.instances.iter().map(|i| i.instance.clone()));
        Ok(self.regional_op(&mut state))
    }

    async fn delete_target_pool(
        &self,
        _project: &str,
        _region: &str,
        pool: &str,
    ) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, "delete_target_pool", pool)?;
        if state.target_pools.remove(pool).is_none() {
            return Self::not_found("targetPools", pool);
        }
        Ok(self.regional_op(&mut state))
    }

    async fn get_forwarding_rule(
        &self,
        _project: &str,
        _region: &str,
        rule: &str,
    ) -> Result<ForwardingRule> {
        let mut state = self.lock();
        self.record(&mut state, "get_forwarding_rule", rule)?;
        match state.forwarding_rules.get(rule) {
            Some(r) => Ok(r.clone()),
            None => Self::not_found("forwardingRules", rule),
        }
    }

    async fn insert_forwarding_rule(
        &self,
        _project: &str,
        _region: &str,
        rule: &ForwardingRule,
    ) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, "insert_forwarding_rule", &rule.name)?;
        state
            .forwarding_rules
            .insert(rule.name.clone(), rule.clone());
        Ok(self.regional_op(&mut state))
    }

    async fn delete_forwarding_rule(
        &self,
        _project: &str,
        _region: &str,
        rule: &str,
    ) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, "delete_forwarding_rule", rule)?;
        if state.forwarding_rules.remove(rule).is_none() {
            return Self::not_found("forwardingRules", rule);
        }
        Ok(self.regional_op(&mut state))
    }

    async fn get_firewall(&self, _project: &str, firewall: &str) -> Result<Firewall> {
        let mut state = self.lock();
        self.record(&mut state, "get_firewall", firewall)?;
        match state.firewalls.get(firewall) {
            Some(f) => Ok(f.clone()),
            None => Self::not_found("firewalls", firewall),
        }
    }

    async fn insert_firewall(&self, _project: &str, firewall: &Firewall) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, "insert_firewall", &firewall.name)?;
        state
            .firewalls
            .insert(firewall.name.clone(), firewall.clone());
        Ok(self.global_op(&mut state))
    }

    async fn update_firewall(&self, _project: &str, firewall: &Firewall) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, "update_firewall", &firewall.name)?;
        if !state.firewalls.contains_key(&firewall.name) {
            return Self::not_found("firewalls", &firewall.name);
        }
        state
            .firewalls
            .insert(firewall.name.clone(), firewall.clone());
        Ok(self.global_op(&mut state))
    }

    async fn delete_firewall(&self, _project: &str, firewall: &str) -> Result<Operation> {
        let mut state = self.lock();
        self.record(&mut state, "delete_firewall", firewall)?;
        if state.firewalls.remove(firewall).is_none() {
            return Self::not_found("firewalls", firewall);
        }
        Ok(self.global_op(&mut state))
    }

    async fn get_address(&self, _project: &str, _region: &str, address: &str) -> Result<Address> {
        let mut state = self.lock();
        self.record(&mut state, "get_address", address)?;
        match state.addresses.get(address) {
            Some(a) => Ok(a.clone()),
            None => Self::not_found("addresses", address),
        }
    }

    async fn get_zone_operation(
        &self,
        _project: &str,
        _zone: &str,
        operation: &str,
    ) -> Result<Operation> {
        self.poll("get_zone_operation", operation)
    }

    async fn get_region_operation(
        &self,
        _project: &str,
        _region: &str,
        operation: &str,
    ) -> Result<Operation> {
        self.poll("get_region_operation", operation)
    }

    async fn get_global_operation(&self, _project: &str, operation: &str) -> Result<Operation> {
        self.poll("get_global_operation", operation)
    }
}

/// Shorthand for tests: a fake plus a client connected to it.
pub async fn connected(
    fake: Arc<FakeCompute>,
    poller: crate::operation::PollerConfig,
) -> Result<crate::client::ComputeClient> {
    let identity = fake.identity();
    crate::client::ComputeClient::connect(fake, identity, poller).await
}
