// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Instance storage gate.
//!
//! A class with instance storage templates makes every VM of that class carry
//! claim-backed local volumes. The gate walks each VM through:
//!
//! ```text
//! Unconfigured -> Claimed -> Pending -> Ready
//! ```
//!
//! - **Unconfigured**: the VM does not list its instance storage volumes yet.
//!   [`configure`] appends one volume per template and creates one claim each.
//! - **Claimed**: claims exist but the volume controller has not published the
//!   "claims bound" annotation. The VM must not be created.
//! - **Pending**: claims are bound but not every volume reports attached.
//!   The VM must not be powered on.
//! - **Ready**: power-on may proceed.
//!
//! The gate only reads what the volume controller publishes on the VM; it never
//! calls that controller.

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::context::Context;
use crate::crd::{
    InstanceVolumeClaim, PersistentVolumeClaimSource, VirtualMachine, VirtualMachineClassSpec,
    VirtualMachineVolume,
};
use crate::labels::{
    INSTANCE_STORAGE_LABEL, K8S_MANAGED_BY, K8S_SELECTED_NODE_ANNOTATION, MANAGED_BY_VMCONVERGE,
    OWNER_VM_LABEL, PVCS_BOUND_ANNOTATION, SELECTED_NODE_ANNOTATION,
};
use crate::store::update_vm_with_retry;
use crate::vm_errors::{ConvergeError, StorageGateError};

/// Where a VM is in the instance storage workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    Unconfigured,
    Claimed,
    Pending,
    Ready,
}

/// Volume templates a class declares, in declaration order.
#[must_use]
pub fn class_templates(class: &VirtualMachineClassSpec) -> Vec<InstanceVolumeClaim> {
    class
        .instance_storage
        .as_ref()
        .map(|is| {
            is.volumes
                .iter()
                .map(|v| InstanceVolumeClaim {
                    storage_class: is.storage_class.clone(),
                    size: v.size.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Instance volumes the VM needs: the ones it already lists, or the class templates.
#[must_use]
pub fn desired_instance_volumes(
    vm: &VirtualMachine,
    class: &VirtualMachineClassSpec,
) -> Vec<InstanceVolumeClaim> {
    if vm.has_instance_storage() {
        vm.instance_storage_volumes()
            .filter_map(|v| {
                v.persistent_volume_claim
                    .as_ref()
                    .and_then(|pvc| pvc.instance_volume_claim.clone())
            })
            .collect()
    } else {
        class_templates(class)
    }
}

/// Deterministic volume name for the `index`th template.
#[must_use]
pub fn volume_name(index: usize) -> String {
    format!("instance-storage-{index}")
}

/// Deterministic claim name for the `index`th template of `vm_name`.
#[must_use]
pub fn claim_name(vm_name: &str, index: usize) -> String {
    format!("{vm_name}-instance-storage-{index}")
}

#[must_use]
pub fn gate_state(vm: &VirtualMachine) -> GateState {
    if !vm.has_instance_storage() {
        return GateState::Unconfigured;
    }
    if vm.annotation(PVCS_BOUND_ANNOTATION).is_none() {
        return GateState::Claimed;
    }
    if check_attached(vm, vm.instance_storage_volumes()).is_err() {
        return GateState::Pending;
    }
    GateState::Ready
}

/// Fails with [`StorageGateError::NotBound`] until the claims-bound annotation appears.
///
/// # Errors
///
/// Returns [`StorageGateError::NotBound`] for a configured VM without the annotation.
pub fn check_bound(vm: &VirtualMachine) -> Result<(), StorageGateError> {
    match gate_state(vm) {
        GateState::Claimed => Err(StorageGateError::NotBound),
        _ => Ok(()),
    }
}

/// Every volume in `volumes` must report attached in `status.volumes` (matched by name).
///
/// # Errors
///
/// [`StorageGateError::StatusPending`] when a volume has no status entry, or has one
/// that is neither attached nor failed; [`StorageGateError::NotAttached`] when the
/// volume controller reported an error.
pub fn check_attached<'a>(
    vm: &VirtualMachine,
    volumes: impl IntoIterator<Item = &'a VirtualMachineVolume>,
) -> Result<(), StorageGateError> {
    let statuses = vm
        .status
        .as_ref()
        .map(|s| s.volumes.as_slice())
        .unwrap_or_default();

    for volume in volumes {
        let Some(status) = statuses.iter().find(|s| s.name == volume.name) else {
            return Err(StorageGateError::StatusPending {
                name: volume.name.clone(),
            });
        };
        if status.attached {
            continue;
        }
        if status.error.as_deref().is_some_and(|e| !e.is_empty()) {
            return Err(StorageGateError::NotAttached {
                name: volume.name.clone(),
            });
        }
        return Err(StorageGateError::StatusPending {
            name: volume.name.clone(),
        });
    }
    Ok(())
}

fn instance_volume(vm_name: &str, index: usize, template: &InstanceVolumeClaim) -> VirtualMachineVolume {
    VirtualMachineVolume {
        name: volume_name(index),
        persistent_volume_claim: Some(PersistentVolumeClaimSource {
            claim_name: claim_name(vm_name, index),
            read_only: false,
            instance_volume_claim: Some(template.clone()),
        }),
        vsphere_volume: None,
    }
}

/// Claim backing one instance storage volume, owned by the VM.
#[must_use]
pub fn build_claim(
    vm: &VirtualMachine,
    claim_name: &str,
    template: &InstanceVolumeClaim,
) -> PersistentVolumeClaim {
    let mut labels = BTreeMap::new();
    labels.insert(INSTANCE_STORAGE_LABEL.to_string(), "true".to_string());
    labels.insert(OWNER_VM_LABEL.to_string(), vm.name_any());
    labels.insert(K8S_MANAGED_BY.to_string(), MANAGED_BY_VMCONVERGE.to_string());

    let annotations = vm.annotation(SELECTED_NODE_ANNOTATION).map(|node| {
        let mut annotations = BTreeMap::new();
        annotations.insert(K8S_SELECTED_NODE_ANNOTATION.to_string(), node.to_string());
        annotations
    });

    let owner = vm.meta().uid.clone().map(|uid| OwnerReference {
        api_version: VirtualMachine::api_version(&()).to_string(),
        kind: VirtualMachine::kind(&()).to_string(),
        name: vm.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    });

    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(template.size.clone()));

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim_name.to_string()),
            namespace: vm.namespace(),
            labels: Some(labels),
            annotations,
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(template.storage_class.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Move the VM out of `Unconfigured`: append instance volumes and create their claims.
///
/// A no-op when the feature is off or the class declares no instance storage.
/// Safe to repeat; existing volumes and claims are left as they are.
///
/// # Errors
///
/// Returns the store error when the VM or a claim cannot be written.
pub async fn configure(
    ctx: &Context,
    vm: &mut VirtualMachine,
    class: &VirtualMachineClassSpec,
) -> Result<(), ConvergeError> {
    if !ctx.settings.features.instance_storage {
        return Ok(());
    }
    let templates = class_templates(class);
    if templates.is_empty() && !vm.has_instance_storage() {
        return Ok(());
    }

    let vm_name = vm.name_any();
    if !vm.has_instance_storage() {
        info!(
            namespace = ?vm.namespace(),
            name = %vm_name,
            count = templates.len(),
            "Adding instance storage volumes to VM"
        );
        update_vm_with_retry(ctx.store.as_ref(), vm, |vm| {
            if vm.has_instance_storage() {
                return false;
            }
            vm.spec.volumes.extend(
                templates
                    .iter()
                    .enumerate()
                    .map(|(i, t)| instance_volume(&vm_name, i, t)),
            );
            true
        })
        .await?;
    }

    let namespace = vm.namespace().unwrap_or_default();
    for volume in vm.instance_storage_volumes() {
        let Some(pvc) = volume.persistent_volume_claim.as_ref() else {
            continue;
        };
        let Some(template) = pvc.instance_volume_claim.as_ref() else {
            continue;
        };
        if ctx.store.get_claim(&namespace, &pvc.claim_name).await?.is_some() {
            continue;
        }
        debug!(namespace = %namespace, claim = %pvc.claim_name, "Creating instance storage claim");
        ctx.store
            .create_claim(&build_claim(vm, &pvc.claim_name, template))
            .await?;
    }

    Ok(())
}

#[cfg(test)]
#[path = "instance_storage_tests.rs"]
mod instance_storage_tests;
