// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Declarative store access.
//!
//! The reconciler and the admission webhooks read and write cluster objects only
//! through [`ClusterStore`]: get/list plus update-with-conflict-detection. Two
//! implementations exist:
//!
//! - [`kubernetes::KubeClusterStore`] - the Kubernetes API server
//! - [`memory::InMemoryClusterStore`] - an in-process store for tests
//!
//! Cross-object references are plain names (VM holds zone name, claim holds VM
//! name) resolved through the store on demand.

pub mod kubernetes;
pub mod memory;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::collections::BTreeMap;
use tracing::debug;

use crate::constants::MAX_CONFLICT_RETRIES;
use crate::crd::{
    VirtualMachine, VirtualMachineClass, VirtualMachineSetResourcePolicy, VirtualMachineStatus,
    Zone,
};
use crate::reconcilers::status::conditions_equal;
use crate::vm_errors::StoreError;

/// Event severity, mirroring Kubernetes event types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_vm(&self, namespace: &str, name: &str)
        -> Result<Option<VirtualMachine>, StoreError>;

    /// Replace metadata and spec. Fails with [`StoreError::Conflict`] when the
    /// object's resourceVersion is stale.
    async fn update_vm(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError>;

    /// Write the reconciler-owned status fields, conditional on `resource_version`.
    /// `status.volumes` belongs to the volume controller and is never written.
    async fn patch_vm_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: &VirtualMachineStatus,
    ) -> Result<(), StoreError>;

    async fn get_vm_class(&self, name: &str) -> Result<Option<VirtualMachineClass>, StoreError>;

    async fn get_zone(&self, namespace: &str, name: &str) -> Result<Option<Zone>, StoreError>;

    async fn list_zones(&self, namespace: &str) -> Result<Vec<Zone>, StoreError>;

    /// Storage policy ID published on a storage class, if any.
    async fn storage_policy_id(&self, storage_class: &str) -> Result<Option<String>, StoreError>;

    async fn get_resource_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachineSetResourcePolicy>, StoreError>;

    async fn get_config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError>;

    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, StoreError>;

    /// Create a claim; an existing claim with the same name counts as success.
    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), StoreError>;

    /// Best-effort event on a VM. Failures are logged, never returned.
    async fn record_event(
        &self,
        vm: &VirtualMachine,
        event_type: EventType,
        reason: &str,
        message: &str,
    );
}

fn vm_key(vm: &VirtualMachine) -> (String, String) {
    (
        vm.metadata.namespace.clone().unwrap_or_default(),
        vm.metadata.name.clone().unwrap_or_default(),
    )
}

/// Apply `mutate` to the VM and persist it, re-reading and re-applying on conflict.
///
/// `mutate` returns `false` when it made no change, in which case nothing is
/// written. On success `vm` holds the stored object.
///
/// # Errors
///
/// Returns the store error, or [`StoreError::Conflict`] after repeated conflicts.
pub async fn update_vm_with_retry<S, F>(
    store: &S,
    vm: &mut VirtualMachine,
    mut mutate: F,
) -> Result<(), StoreError>
where
    S: ClusterStore + ?Sized,
    F: FnMut(&mut VirtualMachine) -> bool + Send,
{
    let (namespace, name) = vm_key(vm);

    for attempt in 1..=MAX_CONFLICT_RETRIES {
        if !mutate(vm) {
            return Ok(());
        }
        match store.update_vm(vm).await {
            Ok(stored) => {
                *vm = stored;
                return Ok(());
            }
            Err(StoreError::Conflict { .. }) => {
                debug!(namespace = %namespace, name = %name, attempt, "Conflict updating VM, re-reading");
                match store.get_vm(&namespace, &name).await? {
                    Some(latest) => *vm = latest,
                    None => {
                        return Err(StoreError::NotFound {
                            kind: "VirtualMachine".to_string(),
                            name,
                        })
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::Conflict {
        kind: "VirtualMachine".to_string(),
        name,
    })
}

/// Write status against the latest stored generation, retrying conflicts with a fresh read.
///
/// Returns `Ok(false)` when the VM no longer exists.
///
/// # Errors
///
/// Returns the store error, or [`StoreError::Conflict`] after repeated conflicts.
pub async fn write_status_with_retry<S>(
    store: &S,
    namespace: &str,
    name: &str,
    status: &VirtualMachineStatus,
) -> Result<bool, StoreError>
where
    S: ClusterStore + ?Sized,
{
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let Some(latest) = store.get_vm(namespace, name).await? else {
            return Ok(false);
        };
        if latest.status.as_ref().is_some_and(|s| owned_status_eq(s, status)) {
            return Ok(true);
        }
        match store
            .patch_vm_status(
                namespace,
                name,
                latest.metadata.resource_version.as_deref(),
                status,
            )
            .await
        {
            Ok(()) => return Ok(true),
            Err(StoreError::Conflict { .. }) => {
                debug!(namespace, name, attempt, "Conflict writing VM status, re-reading");
            }
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::Conflict {
        kind: "VirtualMachine".to_string(),
        name: name.to_string(),
    })
}

/// Compare only the fields the reconciler owns.
#[must_use]
pub fn owned_status_eq(a: &VirtualMachineStatus, b: &VirtualMachineStatus) -> bool {
    a.phase == b.phase
        && a.power_state == b.power_state
        && a.unique_id == b.unique_id
        && a.host == b.host
        && a.zone == b.zone
        && a.instance_uuid == b.instance_uuid
        && a.bios_uuid == b.bios_uuid
        && a.observed_generation == b.observed_generation
        && conditions_equal(&a.conditions, &b.conditions)
}
