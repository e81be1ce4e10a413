// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-process [`ClusterStore`] with resourceVersion checks, for unit tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ClusterStore, EventType};
use crate::crd::{
    VirtualMachine, VirtualMachineClass, VirtualMachineSetResourcePolicy, VirtualMachineStatus,
    Zone,
};
use crate::vm_errors::StoreError;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// An event captured by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
struct StoreState {
    vms: HashMap<Key, VirtualMachine>,
    classes: HashMap<String, VirtualMachineClass>,
    zones: HashMap<Key, Zone>,
    storage_policies: HashMap<String, String>,
    resource_policies: HashMap<Key, VirtualMachineSetResourcePolicy>,
    config_maps: HashMap<Key, BTreeMap<String, String>>,
    claims: HashMap<Key, PersistentVolumeClaim>,
    events: Vec<RecordedEvent>,
    pending_conflicts: usize,
    vm_updates: usize,
    status_writes: usize,
    resource_version: u64,
}

impl StoreState {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryClusterStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryClusterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a VM, assigning a fresh resourceVersion and generation 1 if unset.
    pub fn insert_vm(&self, mut vm: VirtualMachine) {
        let mut state = self.lock();
        vm.metadata.resource_version = Some(state.next_version());
        vm.metadata.generation.get_or_insert(1);
        let k = key(&vm.namespace().unwrap_or_default(), &vm.name_any());
        state.vms.insert(k, vm);
    }

    pub fn insert_class(&self, class: VirtualMachineClass) {
        self.lock().classes.insert(class.name_any(), class);
    }

    pub fn insert_zone(&self, zone: Zone) {
        let k = key(&zone.namespace().unwrap_or_default(), &zone.name_any());
        self.lock().zones.insert(k, zone);
    }

    pub fn set_storage_policy(&self, storage_class: &str, policy_id: &str) {
        self.lock()
            .storage_policies
            .insert(storage_class.to_string(), policy_id.to_string());
    }

    pub fn insert_resource_policy(&self, policy: VirtualMachineSetResourcePolicy) {
        let k = key(&policy.namespace().unwrap_or_default(), &policy.name_any());
        self.lock().resource_policies.insert(k, policy);
    }

    pub fn insert_config_map(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        self.lock().config_maps.insert(key(namespace, name), data);
    }

    /// Set `status.volumes` on a VM, as the volume controller would.
    pub fn set_volume_status(
        &self,
        namespace: &str,
        name: &str,
        volumes: Vec<crate::crd::VolumeStatus>,
    ) {
        let mut state = self.lock();
        let version = state.next_version();
        if let Some(vm) = state.vms.get_mut(&key(namespace, name)) {
            vm.status.get_or_insert_with(Default::default).volumes = volumes;
            vm.metadata.resource_version = Some(version);
        }
    }

    /// Fail the next `count` VM updates with a conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.lock().pending_conflicts = count;
    }

    #[must_use]
    pub fn vm(&self, namespace: &str, name: &str) -> Option<VirtualMachine> {
        self.lock().vms.get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.lock().claims.get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn claims(&self) -> Vec<PersistentVolumeClaim> {
        let mut claims: Vec<_> = self.lock().claims.values().cloned().collect();
        claims.sort_by_key(ResourceExt::name_any);
        claims
    }

    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().events.clone()
    }

    /// Number of successful spec/metadata updates.
    #[must_use]
    pub fn vm_updates(&self) -> usize {
        self.lock().vm_updates
    }

    /// Number of successful status writes.
    #[must_use]
    pub fn status_writes(&self) -> usize {
        self.lock().status_writes
    }
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    async fn get_vm(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>, StoreError> {
        Ok(self.vm(namespace, name))
    }

    async fn update_vm(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError> {
        let mut state = self.lock();
        let name = vm.name_any();
        let k = key(&vm.namespace().unwrap_or_default(), &name);

        let conflict = || StoreError::Conflict {
            kind: "VirtualMachine".to_string(),
            name: name.clone(),
        };

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(conflict());
        }

        let Some(current) = state.vms.get(&k) else {
            return Err(StoreError::NotFound {
                kind: "VirtualMachine".to_string(),
                name: name.clone(),
            });
        };
        if current.metadata.resource_version != vm.metadata.resource_version {
            return Err(conflict());
        }

        let mut stored = vm.clone();
        // Replace never touches the status subresource.
        stored.status.clone_from(&current.status);
        let generation = current.metadata.generation.unwrap_or(1);
        stored.metadata.generation = Some(if current.spec == vm.spec {
            generation
        } else {
            generation + 1
        });
        stored.metadata.resource_version = Some(state.next_version());

        state.vms.insert(k, stored.clone());
        state.vm_updates += 1;
        Ok(stored)
    }

    async fn patch_vm_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: &VirtualMachineStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let version = state.next_version();
        let Some(vm) = state.vms.get_mut(&key(namespace, name)) else {
            return Err(StoreError::NotFound {
                kind: "VirtualMachine".to_string(),
                name: name.to_string(),
            });
        };
        if resource_version.is_some() && vm.metadata.resource_version.as_deref() != resource_version
        {
            return Err(StoreError::Conflict {
                kind: "VirtualMachine".to_string(),
                name: name.to_string(),
            });
        }

        let volumes = vm
            .status
            .as_ref()
            .map(|s| s.volumes.clone())
            .unwrap_or_default();
        vm.status = Some(VirtualMachineStatus {
            volumes,
            ..status.clone()
        });
        vm.metadata.resource_version = Some(version);
        state.status_writes += 1;
        Ok(())
    }

    async fn get_vm_class(&self, name: &str) -> Result<Option<VirtualMachineClass>, StoreError> {
        Ok(self.lock().classes.get(name).cloned())
    }

    async fn get_zone(&self, namespace: &str, name: &str) -> Result<Option<Zone>, StoreError> {
        Ok(self.lock().zones.get(&key(namespace, name)).cloned())
    }

    async fn list_zones(&self, namespace: &str) -> Result<Vec<Zone>, StoreError> {
        let mut zones: Vec<Zone> = self
            .lock()
            .zones
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, z)| z.clone())
            .collect();
        zones.sort_by_key(ResourceExt::name_any);
        Ok(zones)
    }

    async fn storage_policy_id(&self, storage_class: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().storage_policies.get(storage_class).cloned())
    }

    async fn get_resource_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachineSetResourcePolicy>, StoreError> {
        Ok(self
            .lock()
            .resource_policies
            .get(&key(namespace, name))
            .cloned())
    }

    async fn get_config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        Ok(self.lock().config_maps.get(&key(namespace, name)).cloned())
    }

    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, StoreError> {
        Ok(self.claim(namespace, name))
    }

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), StoreError> {
        let k = key(&claim.namespace().unwrap_or_default(), &claim.name_any());
        self.lock().claims.entry(k).or_insert_with(|| claim.clone());
        Ok(())
    }

    async fn record_event(
        &self,
        vm: &VirtualMachine,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        self.lock().events.push(RecordedEvent {
            object: vm.name_any(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
