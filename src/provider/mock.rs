// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory hypervisor for unit testing.
//!
//! [`MockVmProvider`] keeps VMs in memory, applies reconfigure device changes the
//! way the real hypervisor does and counts every call so tests can assert that a
//! converged VM produces no further remote operations.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{CreateVmRequest, ObservedVm, PlacementRequest, PowerOp, Recommendation, VmLookup, VmProvider};
use crate::crd::{NetworkInterface, PowerState};
use crate::vm_errors::ProviderError;
use crate::vsphere::{
    ConfigSpec, DeviceOperation, NetworkBacking, OptionValue, ResolvedNetwork, VirtualDevice,
};

/// Number of calls made per operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub lookup: usize,
    pub create: usize,
    pub reconfigure: usize,
    pub power: usize,
    pub delete: usize,
    pub recommend: usize,
    pub resolve_network: usize,
}

impl CallCounts {
    /// Calls that change hypervisor state.
    #[must_use]
    pub fn mutating(&self) -> usize {
        self.create + self.reconfigure + self.power + self.delete
    }
}

#[derive(Default)]
struct MockState {
    vms: HashMap<String, ObservedVm>,
    /// (namespace, name) → moid
    names: HashMap<(String, String), String>,
    recommendations: Vec<Recommendation>,
    networks: HashMap<String, NetworkBacking>,
    last_create: Option<CreateVmRequest>,
    last_recommend: Option<PlacementRequest>,
    reconfigures: Vec<ConfigSpec>,
    power_ops: Vec<PowerOp>,
    failures: HashMap<&'static str, ProviderError>,
    calls: CallCounts,
    next_id: u64,
}

/// Mock hypervisor client.
#[derive(Clone, Default)]
pub struct MockVmProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockVmProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recommendations returned by `recommend`, best first (for test setup)
    pub fn set_recommendations(&self, recommendations: Vec<Recommendation>) {
        self.lock().recommendations = recommendations;
    }

    /// Register a network so interfaces naming it can be resolved (for test setup)
    pub fn add_network(&self, network_name: &str, backing_moid: &str) {
        self.lock().networks.insert(
            network_name.to_string(),
            NetworkBacking {
                network: backing_moid.to_string(),
                device_name: network_name.to_string(),
            },
        );
    }

    /// Insert an existing VM (for test setup)
    pub fn add_vm(&self, namespace: &str, vm: ObservedVm) {
        let mut state = self.lock();
        state
            .names
            .insert((namespace.to_string(), vm.name.clone()), vm.moid.clone());
        state.vms.insert(vm.moid.clone(), vm);
    }

    /// Make the next call of `operation` fail once with `error`
    pub fn fail_next(&self, operation: &'static str, error: ProviderError) {
        self.lock().failures.insert(operation, error);
    }

    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn vm(&self, moid: &str) -> Option<ObservedVm> {
        self.lock().vms.get(moid).cloned()
    }

    #[must_use]
    pub fn vm_by_name(&self, namespace: &str, name: &str) -> Option<ObservedVm> {
        let state = self.lock();
        state
            .names
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|moid| state.vms.get(moid))
            .cloned()
    }

    /// Change the power state behind the operator's back (for test setup)
    pub fn set_power_state(&self, moid: &str, power_state: PowerState) {
        if let Some(vm) = self.lock().vms.get_mut(moid) {
            vm.power_state = power_state;
        }
    }

    #[must_use]
    pub fn last_create_request(&self) -> Option<CreateVmRequest> {
        self.lock().last_create.clone()
    }

    #[must_use]
    pub fn last_placement_request(&self) -> Option<PlacementRequest> {
        self.lock().last_recommend.clone()
    }

    #[must_use]
    pub fn reconfigure_specs(&self) -> Vec<ConfigSpec> {
        self.lock().reconfigures.clone()
    }

    #[must_use]
    pub fn power_ops(&self) -> Vec<PowerOp> {
        self.lock().power_ops.clone()
    }
}

fn take_failure(state: &mut MockState, operation: &'static str) -> Result<(), ProviderError> {
    match state.failures.remove(operation) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn apply_device_changes(vm: &mut ObservedVm, spec: &ConfigSpec) {
    for change in &spec.device_change {
        let key = change.device.key();
        match change.operation {
            DeviceOperation::Add => vm.devices.push(change.device.clone()),
            DeviceOperation::Edit => {
                if let Some(existing) = vm.devices.iter_mut().find(|d| d.key() == key) {
                    *existing = change.device.clone();
                }
            }
            DeviceOperation::Remove => vm.devices.retain(|d| d.key() != key),
        }
    }

    if !spec.extra_config.is_empty() {
        let mut merged: BTreeMap<String, String> = vm
            .extra_config
            .iter()
            .map(|ov| (ov.key.clone(), ov.value.clone()))
            .collect();
        merged.extend(
            spec.extra_config
                .iter()
                .map(|ov| (ov.key.clone(), ov.value.clone())),
        );
        vm.extra_config = merged
            .into_iter()
            .map(|(k, v)| OptionValue::new(k, v))
            .collect();
    }
}

#[async_trait]
impl VmProvider for MockVmProvider {
    async fn lookup_vm(&self, lookup: &VmLookup) -> Result<Option<ObservedVm>, ProviderError> {
        let mut state = self.lock();
        state.calls.lookup += 1;
        take_failure(&mut state, "lookup_vm")?;

        let moid = match &lookup.unique_id {
            Some(moid) => Some(moid.clone()),
            None => state
                .names
                .get(&(lookup.namespace.clone(), lookup.name.clone()))
                .cloned(),
        };
        Ok(moid.and_then(|m| state.vms.get(&m).cloned()))
    }

    async fn create_vm(&self, request: &CreateVmRequest) -> Result<ObservedVm, ProviderError> {
        let mut state = self.lock();
        state.calls.create += 1;
        take_failure(&mut state, "create_vm")?;

        state.next_id += 1;
        let id = state.next_id;
        let mut vm = ObservedVm {
            moid: format!("vm-{id}"),
            name: request.name.clone(),
            power_state: PowerState::PoweredOff,
            host: request
                .host
                .clone()
                .unwrap_or_else(|| format!("esx-{id}.local")),
            resource_pool: request.resource_pool.clone(),
            instance_uuid: format!("instance-uuid-{id}"),
            bios_uuid: format!("bios-uuid-{id}"),
            devices: Vec::new(),
            extra_config: Vec::new(),
        };
        apply_device_changes(&mut vm, &request.config_spec);

        state.names.insert(
            (request.namespace.clone(), request.name.clone()),
            vm.moid.clone(),
        );
        state.vms.insert(vm.moid.clone(), vm.clone());
        state.last_create = Some(request.clone());
        Ok(vm)
    }

    async fn reconfigure(&self, moid: &str, spec: &ConfigSpec) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.calls.reconfigure += 1;
        take_failure(&mut state, "reconfigure")?;

        let vm = state
            .vms
            .get_mut(moid)
            .ok_or_else(|| ProviderError::NotFound(moid.to_string()))?;
        apply_device_changes(vm, spec);
        state.reconfigures.push(spec.clone());
        Ok(())
    }

    async fn power_op(&self, moid: &str, op: PowerOp) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.calls.power += 1;
        take_failure(&mut state, "power_op")?;

        let vm = state
            .vms
            .get_mut(moid)
            .ok_or_else(|| ProviderError::NotFound(moid.to_string()))?;
        vm.power_state = op.resulting_state();
        state.power_ops.push(op);
        Ok(())
    }

    async fn delete_vm(&self, moid: &str) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.calls.delete += 1;
        take_failure(&mut state, "delete_vm")?;

        let powered_on = match state.vms.get(moid) {
            None => return Err(ProviderError::NotFound(moid.to_string())),
            Some(vm) => vm.power_state == PowerState::PoweredOn,
        };
        if powered_on {
            return Err(ProviderError::Fault {
                operation: "delete_vm".to_string(),
                message: "cannot destroy a powered on VM".to_string(),
            });
        }
        state.vms.remove(moid);
        state.names.retain(|_, m| m != moid);
        Ok(())
    }

    async fn recommend(
        &self,
        request: &PlacementRequest,
    ) -> Result<Vec<Recommendation>, ProviderError> {
        let mut state = self.lock();
        state.calls.recommend += 1;
        take_failure(&mut state, "recommend")?;

        state.last_recommend = Some(request.clone());
        Ok(state
            .recommendations
            .iter()
            .filter(|r| request.candidate_pools.contains(&r.resource_pool))
            .cloned()
            .collect())
    }

    async fn resolve_network(
        &self,
        _namespace: &str,
        interface: &NetworkInterface,
    ) -> Result<ResolvedNetwork, ProviderError> {
        let mut state = self.lock();
        state.calls.resolve_network += 1;
        take_failure(&mut state, "resolve_network")?;

        let backing = state
            .networks
            .get(&interface.network_name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(interface.network_name.clone()))?;
        state.next_id += 1;
        Ok(ResolvedNetwork {
            interface_name: interface.name.clone(),
            backing,
            mac_address: format!("00:50:56:00:00:{:02x}", state.next_id % 256),
            external_id: None,
        })
    }
}
