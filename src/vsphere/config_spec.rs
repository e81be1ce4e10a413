// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! ConfigSpec synthesis.
//!
//! Turns a `VirtualMachineClass`, the VM's advanced options and its instance storage
//! templates into a hypervisor [`ConfigSpec`]. No I/O happens here: storage policy IDs
//! and resolved networks are passed in by the caller.
//!
//! Output ordering is deterministic for identical inputs. The device-change list is the
//! raw override's device changes (in document order) followed by one disk add per
//! instance storage volume (in template order), with keys drawn from a
//! [`DeviceKeyAllocator`].

use base64::Engine;
use std::collections::BTreeMap;

use crate::constants::CONFIG_SPEC_ANNOTATION;
use crate::crd::{AdvancedOptions, InstanceVolumeClaim, VirtualMachineClassSpec};
use crate::quantity::{bytes_to_mib, parse_quantity};
use crate::vm_errors::ConfigSpecError;
use crate::vsphere::types::{
    ConfigSpec, DeviceConfigSpec, DeviceOperation, FileOperation, NetworkBacking, OptionValue,
    ProfileSpec, VirtualDevice, VirtualDisk, VirtualEthernetCard,
};

/// Key handed out when no device keys are in use yet.
const FIRST_DEVICE_KEY: i32 = 1;

/// Adapter model used for NICs the class does not declare.
pub const DEFAULT_ADAPTER_TYPE: &str = "vmxnet3";

/// Monotonically increasing device-key source.
///
/// Seeded strictly above every key already in use so newly added devices never
/// collide with devices from the raw override or from the live VM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceKeyAllocator {
    next: i32,
}

impl DeviceKeyAllocator {
    pub fn new(in_use: impl IntoIterator<Item = i32>) -> Self {
        let next = in_use
            .into_iter()
            .max()
            .map_or(FIRST_DEVICE_KEY, |max| max.saturating_add(1).max(FIRST_DEVICE_KEY));
        Self { next }
    }

    /// Raise the floor so later keys stay above `in_use`.
    pub fn reserve(&mut self, in_use: impl IntoIterator<Item = i32>) {
        if let Some(max) = in_use.into_iter().max() {
            self.next = self.next.max(max.saturating_add(1));
        }
    }

    pub fn next_key(&mut self) -> i32 {
        let key = self.next;
        self.next = self.next.saturating_add(1);
        key
    }
}

/// A NIC backing resolved by the hypervisor's network provider.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedNetwork {
    pub interface_name: String,
    pub backing: NetworkBacking,
    pub mac_address: String,
    #[serde(default)]
    pub external_id: Option<String>,
}

/// Inputs of [`synthesize`].
#[derive(Clone, Debug)]
pub struct SynthesisInput<'a> {
    pub vm_name: &'a str,
    pub class_name: &'a str,
    pub class: &'a VirtualMachineClassSpec,
    pub advanced_options: Option<&'a AdvancedOptions>,
    /// Instance storage volumes in declaration order
    pub instance_volumes: &'a [InstanceVolumeClaim],
    /// Storage class name to storage policy ID
    pub storage_policies: &'a BTreeMap<String, String>,
}

/// Decode a class raw override: base64, then a JSON ConfigSpec document.
///
/// # Errors
///
/// Returns [`ConfigSpecError::InvalidClassConfig`] if either step fails.
pub fn decode_class_config_spec(
    class_name: &str,
    encoded: &str,
) -> Result<ConfigSpec, ConfigSpecError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ConfigSpecError::InvalidClassConfig {
            class: class_name.to_string(),
            reason: format!("corrupt base64 input: {e}"),
        })?;

    serde_json::from_slice(&raw).map_err(|e| ConfigSpecError::InvalidClassConfig {
        class: class_name.to_string(),
        reason: e.to_string(),
    })
}

/// Build the ConfigSpec for a VM from its class.
///
/// The same function produces the placement-only document and the base of the
/// create document; callers add extra config and networking on top for the latter.
///
/// # Errors
///
/// - [`ConfigSpecError::InvalidClassConfig`] when the raw override cannot be decoded
/// - [`ConfigSpecError::UnknownStorageClass`] when a volume's storage class has no policy
/// - [`ConfigSpecError::InvalidQuantity`] when memory or a volume size is malformed
pub fn synthesize(
    input: &SynthesisInput<'_>,
    allocator: &mut DeviceKeyAllocator,
) -> Result<ConfigSpec, ConfigSpecError> {
    let mut spec = match input.class.config_spec.as_deref() {
        Some(encoded) if !encoded.trim().is_empty() => {
            decode_class_config_spec(input.class_name, encoded)?
        }
        _ => ConfigSpec::default(),
    };

    spec.name = input.vm_name.to_string();
    if spec.annotation.is_empty() {
        spec.annotation = CONFIG_SPEC_ANNOTATION.to_string();
    }
    spec.num_cpus = input.class.cpus;

    let memory_bytes =
        parse_quantity(&input.class.memory).map_err(|e| ConfigSpecError::InvalidQuantity {
            field: "memory".to_string(),
            value: input.class.memory.clone(),
            reason: e.to_string(),
        })?;
    spec.memory_mb = bytes_to_mib(memory_bytes);

    allocator.reserve(spec.device_change.iter().map(|dc| dc.device.key()));

    let thin = input.advanced_options.and_then(|o| o.thin_provisioned);
    for volume in input.instance_volumes {
        spec.device_change
            .push(instance_disk_add(volume, thin, input.storage_policies, allocator)?);
    }

    Ok(spec)
}

fn instance_disk_add(
    volume: &InstanceVolumeClaim,
    thin_provisioned: Option<bool>,
    storage_policies: &BTreeMap<String, String>,
    allocator: &mut DeviceKeyAllocator,
) -> Result<DeviceConfigSpec, ConfigSpecError> {
    let policy_id = storage_policies
        .get(&volume.storage_class)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ConfigSpecError::UnknownStorageClass {
            storage_class: volume.storage_class.clone(),
        })?;

    let capacity = parse_quantity(&volume.size).map_err(|e| ConfigSpecError::InvalidQuantity {
        field: "instance storage size".to_string(),
        value: volume.size.clone(),
        reason: e.to_string(),
    })?;

    Ok(DeviceConfigSpec {
        operation: DeviceOperation::Add,
        file_operation: Some(FileOperation::Create),
        device: VirtualDevice::Disk(VirtualDisk {
            key: allocator.next_key(),
            capacity_in_bytes: capacity,
            thin_provisioned,
            ..Default::default()
        }),
        profile: vec![ProfileSpec {
            profile_id: policy_id.clone(),
        }],
    })
}

/// Rewrite networking in a synthesized ConfigSpec.
///
/// NICs that came from the class keep their adapter type, controller and slot but
/// always get the resolved backing and MAC. Extra resolved networks become new NIC
/// adds. Class NICs without a matching interface are dropped, so a VM that declares
/// no interfaces gets no NIC at all.
pub fn apply_networks(
    spec: &mut ConfigSpec,
    networks: &[ResolvedNetwork],
    allocator: &mut DeviceKeyAllocator,
) {
    let mut class_nics = Vec::new();
    let mut others = Vec::with_capacity(spec.device_change.len());
    for change in spec.device_change.drain(..) {
        match (change.operation, change.device) {
            (DeviceOperation::Add, VirtualDevice::EthernetCard(nic)) => class_nics.push(nic),
            (operation, device) => others.push(DeviceConfigSpec {
                operation,
                device,
                ..change
            }),
        }
    }

    let mut class_nics = class_nics.into_iter();
    let mut nic_changes = Vec::with_capacity(networks.len());
    for network in networks {
        let nic = match class_nics.next() {
            Some(template) => VirtualEthernetCard {
                backing: Some(network.backing.clone()),
                mac_address: Some(network.mac_address.clone()),
                external_id: network.external_id.clone(),
                ..template
            },
            None => VirtualEthernetCard {
                key: allocator.next_key(),
                adapter_type: DEFAULT_ADAPTER_TYPE.to_string(),
                backing: Some(network.backing.clone()),
                mac_address: Some(network.mac_address.clone()),
                external_id: network.external_id.clone(),
                ..Default::default()
            },
        };
        nic_changes.push(DeviceConfigSpec {
            operation: DeviceOperation::Add,
            file_operation: None,
            device: VirtualDevice::EthernetCard(nic),
            profile: Vec::new(),
        });
    }

    // NICs go first so guest interface order follows the declared order
    spec.device_change = nic_changes.into_iter().chain(others).collect();
}

/// Replace the spec's extra config, keeping keys sorted.
pub fn set_extra_config(spec: &mut ConfigSpec, extra_config: BTreeMap<String, String>) {
    spec.extra_config = extra_config
        .into_iter()
        .map(|(k, v)| OptionValue::new(k, v))
        .collect();
}

#[cfg(test)]
#[path = "config_spec_tests.rs"]
mod config_spec_tests;
