// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Admission rules for `VirtualMachine`.
//!
//! Each rule has a pure match condition over the old and new object. Only rules
//! whose condition holds are evaluated, and a request that matches no rule is
//! allowed without touching the store.

use std::sync::Arc;

use async_trait::async_trait;
use kube::core::admission::Operation;
use kube::ResourceExt;
use tracing::debug;

use super::field_errors::{FieldError, FieldErrorList, FieldPath};
use super::persistentvolumeclaim::ZONE_BEING_DELETED;
use super::{ValidationRequest, Validator};
use crate::constants::KIND_VIRTUAL_MACHINE;
use crate::crd::{VirtualMachine, VirtualMachineVolume};
use crate::labels::ZONE_LABEL;
use crate::quantity::parse_quantity;
use crate::store::ClusterStore;
use crate::vm_errors::AdmissionError;

pub const FIELD_IMMUTABLE: &str = "field is immutable";

pub const ADDING_INSTANCE_STORAGE_NOT_ALLOWED: &str =
    "adding or changing instance storage volumes is not allowed";

/// A VM admission rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmRule {
    /// A disk capacity changed: it needs a device key and a valid size.
    VolumeCapacityChange,
    /// Class and image cannot change after create.
    ImmutableClassAndImage,
    /// A zone label, once set, stays.
    ImmutableZoneLabel,
    /// Only the operator adds instance storage volumes.
    InstanceStorageVolumes,
    /// New VMs cannot target a deleting zone.
    ZoneNotDeleting,
}

impl VmRule {
    pub const ALL: [VmRule; 5] = [
        VmRule::VolumeCapacityChange,
        VmRule::ImmutableClassAndImage,
        VmRule::ImmutableZoneLabel,
        VmRule::InstanceStorageVolumes,
        VmRule::ZoneNotDeleting,
    ];

    /// Match condition. Pure: reads only the request, never the store.
    #[must_use]
    pub fn matches(
        self,
        operation: &Operation,
        old: Option<&VirtualMachine>,
        new: &VirtualMachine,
        privileged: bool,
    ) -> bool {
        match (self, operation) {
            (VmRule::VolumeCapacityChange, Operation::Update) => {
                old.is_some_and(|old| !changed_capacities(old, new).is_empty())
            }
            (VmRule::ImmutableClassAndImage, Operation::Update) => old.is_some_and(|old| {
                old.spec.class_name != new.spec.class_name
                    || old.spec.image_name != new.spec.image_name
            }),
            (VmRule::ImmutableZoneLabel, Operation::Update) => {
                !privileged
                    && old.and_then(VirtualMachine::zone_label).is_some_and(|zone| {
                        new.labels().get(ZONE_LABEL).map(String::as_str) != Some(zone)
                    })
            }
            (VmRule::InstanceStorageVolumes, Operation::Create | Operation::Update) => {
                !privileged && !added_instance_volumes(old, new).is_empty()
            }
            (VmRule::ZoneNotDeleting, Operation::Create) => new.zone_label().is_some(),
            _ => false,
        }
    }
}

/// Indexes of vsphere volumes whose capacity is declared on both sides and differs.
fn changed_capacities(old: &VirtualMachine, new: &VirtualMachine) -> Vec<usize> {
    new.spec
        .volumes
        .iter()
        .enumerate()
        .filter_map(|(i, volume)| {
            let new_capacity = capacity(volume)?;
            let old_capacity = old
                .spec
                .volumes
                .iter()
                .find(|v| v.name == volume.name)
                .and_then(capacity)?;
            (old_capacity != new_capacity).then_some(i)
        })
        .collect()
}

fn capacity(volume: &VirtualMachineVolume) -> Option<&str> {
    volume
        .vsphere_volume
        .as_ref()
        .and_then(|v| v.capacity.as_deref())
}

/// Indexes of instance storage volumes in `new` that `old` does not carry unchanged.
fn added_instance_volumes(old: Option<&VirtualMachine>, new: &VirtualMachine) -> Vec<usize> {
    new.spec
        .volumes
        .iter()
        .enumerate()
        .filter(|(_, volume)| volume.is_instance_storage())
        .filter(|(_, volume)| old.is_none_or(|old| !old.spec.volumes.contains(volume)))
        .map(|(i, _)| i)
        .collect()
}

fn volume_path(index: usize) -> FieldPath {
    FieldPath::new("spec").child("volumes").index(index)
}

fn zone_label_path() -> FieldPath {
    FieldPath::new("metadata").child("labels").key(ZONE_LABEL)
}

pub struct VirtualMachineValidator {
    store: Arc<dyn ClusterStore>,
}

impl VirtualMachineValidator {
    #[must_use]
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    async fn validate(
        &self,
        request: &ValidationRequest<VirtualMachine>,
    ) -> Result<FieldErrorList, AdmissionError> {
        let new = request
            .object
            .as_ref()
            .ok_or_else(|| AdmissionError::MissingObject {
                kind: KIND_VIRTUAL_MACHINE.to_string(),
            })?;
        let old = request.old_object.as_ref();

        let rules: Vec<VmRule> = VmRule::ALL
            .into_iter()
            .filter(|rule| rule.matches(&request.operation, old, new, request.privileged))
            .collect();
        if rules.is_empty() {
            return Ok(FieldErrorList::new());
        }
        debug!(namespace = %request.namespace, name = %request.name, rules = ?rules, "Evaluating VM admission rules");

        let mut errors = FieldErrorList::new();
        for rule in rules {
            errors.extend(self.evaluate(rule, &request.namespace, old, new).await?);
        }
        Ok(errors)
    }

    async fn evaluate(
        &self,
        rule: VmRule,
        namespace: &str,
        old: Option<&VirtualMachine>,
        new: &VirtualMachine,
    ) -> Result<FieldErrorList, AdmissionError> {
        let mut errors = FieldErrorList::new();
        match rule {
            VmRule::VolumeCapacityChange => {
                if let Some(old) = old {
                    for index in changed_capacities(old, new) {
                        validate_capacity_change(index, &new.spec.volumes[index], &mut errors);
                    }
                }
            }
            VmRule::ImmutableClassAndImage => {
                if let Some(old) = old {
                    if old.spec.class_name != new.spec.class_name {
                        errors.push(FieldError::invalid(
                            FieldPath::new("spec").child("className"),
                            FIELD_IMMUTABLE,
                        ));
                    }
                    if old.spec.image_name != new.spec.image_name {
                        errors.push(FieldError::invalid(
                            FieldPath::new("spec").child("imageName"),
                            FIELD_IMMUTABLE,
                        ));
                    }
                }
            }
            VmRule::ImmutableZoneLabel => {
                errors.push(FieldError::forbidden(zone_label_path(), FIELD_IMMUTABLE));
            }
            VmRule::InstanceStorageVolumes => {
                for index in added_instance_volumes(old, new) {
                    errors.push(FieldError::forbidden(
                        volume_path(index)
                            .child("persistentVolumeClaim")
                            .child("instanceVolumeClaim"),
                        ADDING_INSTANCE_STORAGE_NOT_ALLOWED,
                    ));
                }
            }
            VmRule::ZoneNotDeleting => {
                if let Some(zone_name) = new.zone_label() {
                    match self.store.get_zone(namespace, zone_name).await? {
                        None => errors.push(FieldError::invalid(
                            zone_label_path(),
                            format!("zone '{zone_name}' not found"),
                        )),
                        Some(zone) if zone.is_being_deleted() => {
                            errors.push(FieldError::invalid(zone_label_path(), ZONE_BEING_DELETED));
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        Ok(errors)
    }
}

fn validate_capacity_change(index: usize, volume: &VirtualMachineVolume, errors: &mut FieldErrorList) {
    let path = volume_path(index).child("vsphereVolume");
    let Some(source) = volume.vsphere_volume.as_ref() else {
        return;
    };
    if source.device_key.is_none() {
        errors.push(FieldError::required(
            path.child("deviceKey"),
            "deviceKey is required to resize a volume",
        ));
    }
    if let Some(capacity) = source.capacity.as_deref() {
        match parse_quantity(capacity) {
            Ok(bytes) if bytes > 0 => {}
            Ok(_) => errors.push(FieldError::invalid(
                path.child("capacity"),
                "capacity must be greater than zero",
            )),
            Err(e) => errors.push(FieldError::invalid(
                path.child("capacity"),
                format!("invalid capacity {capacity}: {e}"),
            )),
        }
    }
}

#[async_trait]
impl Validator for VirtualMachineValidator {
    type Object = VirtualMachine;

    async fn validate_create(
        &self,
        request: &ValidationRequest<VirtualMachine>,
    ) -> Result<FieldErrorList, AdmissionError> {
        self.validate(request).await
    }

    async fn validate_update(
        &self,
        request: &ValidationRequest<VirtualMachine>,
    ) -> Result<FieldErrorList, AdmissionError> {
        self.validate(request).await
    }

    async fn validate_delete(
        &self,
        _request: &ValidationRequest<VirtualMachine>,
    ) -> Result<FieldErrorList, AdmissionError> {
        Ok(FieldErrorList::new())
    }
}

#[cfg(test)]
#[path = "virtualmachine_tests.rs"]
mod virtualmachine_tests;
