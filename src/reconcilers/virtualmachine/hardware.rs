// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Desired-versus-observed hardware diff for an existing VM.
//!
//! Everything here is pure: the caller fetches the live VM and resolves networks,
//! these functions only decide which device changes close the gap.

use std::collections::BTreeMap;

use crate::crd::{NetworkInterface, VirtualMachineVolume};
use crate::provider::ObservedVm;
use crate::quantity::parse_quantity;
use crate::vm_errors::ConfigSpecError;
use crate::vsphere::extra_config::extra_config_delta;
use crate::vsphere::{
    ConfigSpec, DeviceConfigSpec, DeviceKeyAllocator, DeviceOperation, ResolvedNetwork,
    VirtualDevice, VirtualEthernetCard,
};

/// Disk edits for hypervisor-native volumes whose requested capacity exceeds the
/// observed one. A smaller request is skipped: capacity only ever grows.
///
/// # Errors
///
/// Returns [`ConfigSpecError::InvalidQuantity`] for an unparseable capacity.
pub fn disk_resize_changes(
    volumes: &[VirtualMachineVolume],
    observed: &ObservedVm,
) -> Result<Vec<DeviceConfigSpec>, ConfigSpecError> {
    let mut changes = Vec::new();

    for volume in volumes {
        let Some(source) = volume.vsphere_volume.as_ref() else {
            continue;
        };
        let (Some(capacity), Some(device_key)) = (source.capacity.as_ref(), source.device_key)
        else {
            continue;
        };

        let requested = parse_quantity(capacity).map_err(|e| ConfigSpecError::InvalidQuantity {
            field: format!("volume {} capacity", volume.name),
            value: capacity.clone(),
            reason: e.to_string(),
        })?;

        let Some(disk) = observed.devices.iter().find_map(|d| match d {
            VirtualDevice::Disk(disk) if disk.key == device_key => Some(disk),
            _ => None,
        }) else {
            continue;
        };

        let target = requested.max(disk.capacity_in_bytes);
        if target == disk.capacity_in_bytes {
            continue;
        }

        let mut grown = disk.clone();
        grown.capacity_in_bytes = target;
        changes.push(DeviceConfigSpec {
            operation: DeviceOperation::Edit,
            file_operation: None,
            device: VirtualDevice::Disk(grown),
            profile: Vec::new(),
        });
    }

    Ok(changes)
}

/// What has to happen to the VM's NICs, position by position.
#[derive(Debug, Default)]
pub struct NicPlan<'a> {
    /// Declared interfaces with no NIC yet
    pub add: Vec<&'a NetworkInterface>,
    /// Existing NICs attached to the wrong network
    pub rebind: Vec<(VirtualEthernetCard, &'a NetworkInterface)>,
    /// NICs beyond the declared interfaces
    pub remove: Vec<VirtualEthernetCard>,
}

impl NicPlan<'_> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.rebind.is_empty() && self.remove.is_empty()
    }

    /// Interfaces that need a network resolved before the plan can be applied.
    pub fn interfaces_to_resolve(&self) -> impl Iterator<Item = &NetworkInterface> {
        self.rebind
            .iter()
            .map(|(_, iface)| *iface)
            .chain(self.add.iter().copied())
    }
}

fn observed_nics(observed: &ObservedVm) -> Vec<VirtualEthernetCard> {
    observed
        .devices
        .iter()
        .filter_map(|d| match d {
            VirtualDevice::EthernetCard(nic) => Some(nic.clone()),
            _ => None,
        })
        .collect()
}

/// Match observed NICs to declared interfaces in order.
#[must_use]
pub fn plan_nics<'a>(interfaces: &'a [NetworkInterface], observed: &ObservedVm) -> NicPlan<'a> {
    let nics = observed_nics(observed);
    let mut plan = NicPlan::default();

    for (idx, iface) in interfaces.iter().enumerate() {
        match nics.get(idx) {
            Some(nic) => {
                let attached_to = nic.backing.as_ref().map(|b| b.device_name.as_str());
                if attached_to != Some(iface.network_name.as_str()) {
                    plan.rebind.push((nic.clone(), iface));
                }
            }
            None => plan.add.push(iface),
        }
    }
    plan.remove = nics.into_iter().skip(interfaces.len()).collect();
    plan
}

/// Turn a NIC plan into device changes.
///
/// `resolved` must follow [`NicPlan::interfaces_to_resolve`] order.
#[must_use]
pub fn nic_changes(
    plan: NicPlan<'_>,
    resolved: &[ResolvedNetwork],
    allocator: &mut DeviceKeyAllocator,
) -> Vec<DeviceConfigSpec> {
    let mut resolved = resolved.iter();
    let mut changes = Vec::new();

    for (nic, _) in plan.rebind {
        let Some(network) = resolved.next() else {
            break;
        };
        changes.push(DeviceConfigSpec {
            operation: DeviceOperation::Edit,
            file_operation: None,
            device: VirtualDevice::EthernetCard(VirtualEthernetCard {
                backing: Some(network.backing.clone()),
                mac_address: Some(network.mac_address.clone()),
                external_id: network.external_id.clone(),
                ..nic
            }),
            profile: Vec::new(),
        });
    }

    for _ in plan.add {
        let Some(network) = resolved.next() else {
            break;
        };
        changes.push(DeviceConfigSpec {
            operation: DeviceOperation::Add,
            file_operation: None,
            device: VirtualDevice::EthernetCard(VirtualEthernetCard {
                key: allocator.next_key(),
                adapter_type: crate::vsphere::config_spec::DEFAULT_ADAPTER_TYPE.to_string(),
                backing: Some(network.backing.clone()),
                mac_address: Some(network.mac_address.clone()),
                external_id: network.external_id.clone(),
                ..Default::default()
            }),
            profile: Vec::new(),
        });
    }

    changes.extend(plan.remove.into_iter().map(|nic| DeviceConfigSpec {
        operation: DeviceOperation::Remove,
        file_operation: None,
        device: VirtualDevice::EthernetCard(nic),
        profile: Vec::new(),
    }));

    changes
}

/// Assemble the reconfigure delta. Empty when the VM has converged.
#[must_use]
pub fn reconfigure_delta(
    observed: &ObservedVm,
    device_change: Vec<DeviceConfigSpec>,
    desired_extra_config: &BTreeMap<String, String>,
) -> ConfigSpec {
    ConfigSpec {
        extra_config: extra_config_delta(&observed.extra_config, desired_extra_config),
        device_change,
        ..ConfigSpec::default()
    }
}

#[cfg(test)]
#[path = "hardware_tests.rs"]
mod hardware_tests;
